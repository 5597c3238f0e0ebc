//! Configuration types
//!
//! Durations are expressed in milliseconds on the wire (`*_ms` fields) and
//! as [`Duration`] in code. Every field has a default; `validate` rejects
//! values that would make the orchestration layer misbehave.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorKind;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: &str) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means exactly one attempt.
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retry_on_transient: bool,
    pub retry_on_rate_limit: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retry_on_transient: true,
            retry_on_rate_limit: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_retry_on_transient(mut self, enabled: bool) -> Self {
        self.retry_on_transient = enabled;
        self
    }

    pub fn with_retry_on_rate_limit(mut self, enabled: bool) -> Self {
        self.retry_on_rate_limit = enabled;
        self
    }

    /// Returns true if failures of `kind` may be retried under this policy.
    pub fn allows(&self, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::TransientServer => self.retry_on_transient,
            ErrorKind::RateLimited => self.retry_on_rate_limit,
            ErrorKind::Permanent => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must be >= initial_delay_ms",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be a finite value >= 1.0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RATE LIMIT
// ============================================================================

/// Trailing-window rate limit applied per request key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    /// Accepted submissions per key inside one window.
    pub threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            threshold: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::invalid("rate_limit.window_ms", "must be > 0"));
        }
        if self.threshold == 0 {
            return Err(ConfigError::invalid("rate_limit.threshold", "must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// FETCH CONFIGURATION
// ============================================================================

/// Master configuration for one orchestrated data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Default cache lifetime.
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Quiet period before a reported context is fetched.
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce_delay: Duration,
    /// Deadline for a single network attempt.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    pub timeout_is_transient: bool,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            debounce_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(30),
            timeout_is_transient: true,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_timeout_is_transient(mut self, transient: bool) -> Self {
        self.timeout_is_transient = transient;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::invalid("ttl_ms", "must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout_ms", "must be > 0"));
        }
        self.retry.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// TESTS
// =============================================================================
