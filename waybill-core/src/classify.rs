//! Error classification.
//!
//! Two layers:
//! - signal predicates inspect the raw `(status, code, message)` triple a
//!   transport hands back and decide the [`ErrorKind`]. They run once, when
//!   a [`RemoteError`] is built.
//! - error predicates answer the same questions for an already tagged
//!   [`RemoteError`].
//!
//! All predicates are total. A missing or empty signal is permanent.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RemoteError};

/// HTTP statuses that indicate an internal backend fault.
pub const TRANSIENT_STATUSES: &[u16] = &[500, 502, 503, 504];

/// Backend error codes that indicate an internal fault.
pub const TRANSIENT_CODES: &[&str] = &["500", "XX000", "internal_error", "INTERNAL"];

/// Message fragments that indicate an internal fault (matched case-insensitively).
pub const TRANSIENT_MARKERS: &[&str] = &[
    "500",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

/// HTTP status for rate-limit rejections.
pub const RATE_LIMIT_STATUS: u16 = 429;

/// Backend error codes that indicate a rate-limit rejection.
pub const RATE_LIMIT_CODES: &[&str] = &["429", "rate_limited", "too_many_requests"];

/// Message fragments that indicate a rate-limit rejection (matched case-insensitively).
pub const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "429"];

/// Raw failure shape as observed at the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSignal {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ErrorSignal {
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Returns true if the signal carries a known internal-fault status, code
/// or message marker.
pub fn is_transient_server_signal(signal: Option<&ErrorSignal>) -> bool {
    let Some(signal) = signal else {
        return false;
    };
    signal
        .status
        .is_some_and(|status| TRANSIENT_STATUSES.contains(&status))
        || code_matches(signal.code.as_deref(), TRANSIENT_CODES)
        || message_matches(signal.message.as_deref(), TRANSIENT_MARKERS)
}

/// Returns true if the signal carries a known rate-limit status, code or
/// message marker.
pub fn is_rate_limit_signal(signal: Option<&ErrorSignal>) -> bool {
    let Some(signal) = signal else {
        return false;
    };
    signal.status == Some(RATE_LIMIT_STATUS)
        || code_matches(signal.code.as_deref(), RATE_LIMIT_CODES)
        || message_matches(signal.message.as_deref(), RATE_LIMIT_MARKERS)
}

/// Decide the kind for a raw signal.
///
/// Rate limiting wins when both predicates match, since its backoff curve
/// is the more conservative one.
pub fn classify_signal(signal: Option<&ErrorSignal>) -> ErrorKind {
    if is_rate_limit_signal(signal) {
        ErrorKind::RateLimited
    } else if is_transient_server_signal(signal) {
        ErrorKind::TransientServer
    } else {
        ErrorKind::Permanent
    }
}

/// Returns true if the error is a transient server fault.
pub fn is_transient_server_error(err: &RemoteError) -> bool {
    err.kind() == ErrorKind::TransientServer
}

/// Returns true if the error is a rate-limit rejection.
pub fn is_rate_limited(err: &RemoteError) -> bool {
    err.kind() == ErrorKind::RateLimited
}

fn code_matches(code: Option<&str>, known: &[&str]) -> bool {
    code.is_some_and(|code| {
        let code = code.trim();
        known.iter().any(|k| k.eq_ignore_ascii_case(code))
    })
}

fn message_matches(message: Option<&str>, markers: &[&str]) -> bool {
    message.is_some_and(|message| {
        let lowered = message.to_ascii_lowercase();
        markers.iter().any(|marker| lowered.contains(marker))
    })
}

// =============================================================================
// TESTS
// =============================================================================
