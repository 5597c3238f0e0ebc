//! Tagged errors produced at the network boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::classify::{classify_signal, ErrorSignal};

/// Closed classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Backend fault expected to be temporary. Retried with exponential backoff.
    TransientServer,
    /// Backend refused due to request frequency. Retried with a steeper curve.
    RateLimited,
    /// Anything else. Never retried.
    Permanent,
}

impl ErrorKind {
    /// Returns true for the kinds the retry engine may retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientServer => "transient_server",
            Self::RateLimited => "rate_limited",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a remote procedure call.
///
/// The `kind` is decided once, when the error is built from the raw
/// transport signal, so downstream code matches on a closed set of
/// variants instead of re-inspecting strings.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} remote error: {message}")]
pub struct RemoteError {
    kind: ErrorKind,
    status: Option<u16>,
    code: Option<String>,
    message: String,
}

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    /// Build an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Build an error from a raw transport signal, classifying it.
    ///
    /// A signal without a message keeps its status as the message so the
    /// error always says something.
    pub fn from_signal(signal: ErrorSignal) -> Self {
        let kind = classify_signal(Some(&signal));
        let message = match (&signal.message, signal.status) {
            (Some(message), _) => message.clone(),
            (None, Some(status)) => format!("HTTP {}", status),
            (None, None) => "unknown remote error".to_string(),
        };
        Self {
            kind,
            status: signal.status,
            code: signal.code,
            message,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientServer, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// A call that exceeded its own deadline.
    ///
    /// Timeouts count as transient server faults unless the caller opted
    /// out with `timeout_is_transient = false`.
    pub fn timeout(after: Duration, timeout_is_transient: bool) -> Self {
        let kind = if timeout_is_transient {
            ErrorKind::TransientServer
        } else {
            ErrorKind::Permanent
        };
        Self::new(kind, format!("request timed out after {}ms", after.as_millis()))
            .with_code("timeout")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error was produced by a local deadline.
    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some("timeout")
    }
}

// =============================================================================
// TESTS
// =============================================================================
