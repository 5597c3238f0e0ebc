//! WAYBILL Core - Request Orchestration Types
//!
//! Pure data types shared by every other crate: canonical request keys,
//! the tagged remote error produced at the network boundary, the error
//! classifier, and the fetch configuration surface.
//! This crate contains no I/O and no async code.

pub mod classify;
pub mod config;
pub mod error;
pub mod key;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use classify::{
    classify_signal, is_rate_limit_signal, is_rate_limited, is_transient_server_error,
    is_transient_server_signal, ErrorSignal,
};
pub use config::{ConfigError, FetchConfig, RateLimitConfig, RetryPolicy};
pub use error::{ErrorKind, RemoteError, RemoteResult};
pub use key::{QueryParams, RequestKey, ViewId};
