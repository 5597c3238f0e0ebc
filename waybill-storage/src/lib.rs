//! WAYBILL Storage - shared in-memory state
//!
//! The three process-wide structures the fetch layer consults, each an
//! explicit value owned by one orchestrator rather than an ambient global:
//!
//! - [`TtlCache`]: request key to payload, with lazy expiry
//! - [`PendingRegistry`]: single-flight map of in-flight fetches
//! - [`RateLimiter`]: trailing-window submission gate per key
//!
//! All maps are `DashMap`s. No lock is ever held across an `.await`.

pub mod cache;
pub mod pending;
pub mod rate_limit;

pub use cache::{CacheConfig, CacheEntry, CacheStats, TtlCache};
pub use pending::{PendingRegistry, SharedFetch, Submission};
pub use rate_limit::{RateDecision, RateLimiter};
