//! TTL cache for fetched payloads.
//!
//! Entries carry their own lifetime. A read never returns an expired entry,
//! even if no sweep has run yet: expiry is checked on every `get`, and the
//! dead entry is evicted on the spot. [`TtlCache::sweep`] removes everything
//! that has expired in one pass.
//!
//! # Example
//!
//! ```ignore
//! let cache = TtlCache::new(CacheConfig::new().with_ttl(Duration::from_secs(60)));
//! cache.set(key.clone(), payload);
//!
//! if let Some(hit) = cache.get(&key) {
//!     render(hit);
//! }
//! ```

pub mod entry;
pub mod stats;
pub mod ttl;

pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use ttl::{CacheConfig, TtlCache};
