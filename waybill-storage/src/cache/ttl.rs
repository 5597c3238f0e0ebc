//! The TTL cache itself.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use waybill_core::RequestKey;

use super::entry::CacheEntry;
use super::stats::CacheStats;

/// Configuration for the TTL cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime for entries stored without an explicit TTL.
    pub default_ttl: Duration,
    /// Maximum number of entries. `None` means unbounded.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(120),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Bound the number of entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }
}

/// Key/value cache with per-entry expiry.
///
/// Safe to share behind an `Arc`; every operation is a short synchronous
/// critical section on one `DashMap` shard.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<RequestKey, CacheEntry<V>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Absent,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache whose entries default to `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(CacheConfig::new().with_ttl(ttl))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a live payload, or `None` on miss.
    ///
    /// An expired entry is a miss and is evicted by this call.
    pub fn get(&self, key: &RequestKey) -> Option<V> {
        let now = Instant::now();
        let lookup = match self.entries.get(key) {
            Some(entry) if entry.is_valid_at(now) => Lookup::Hit(entry.payload().clone()),
            Some(_) => Lookup::Expired,
            None => Lookup::Absent,
        };

        match lookup {
            Lookup::Hit(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            Lookup::Expired => {
                // Re-check under the write lock: a fresh value may have landed
                // between the read above and this removal.
                if self
                    .entries
                    .remove_if(key, |_, entry| !entry.is_valid_at(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Absent => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get the full entry if it is still valid. Does not touch statistics.
    pub fn get_entry(&self, key: &RequestKey) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Get a payload even if it has expired, as long as it has not been
    /// evicted yet. Used to hand back a last known value when a fetch is
    /// deferred. Does not evict and does not touch statistics.
    pub fn get_stale(&self, key: &RequestKey) -> Option<V> {
        self.entries.get(key).map(|entry| entry.payload().clone())
    }

    /// Store a payload with the default TTL.
    pub fn set(&self, key: RequestKey, payload: V) {
        self.set_with_ttl(key, payload, self.config.default_ttl);
    }

    /// Store a payload with an explicit TTL.
    pub fn set_with_ttl(&self, key: RequestKey, payload: V, ttl: Duration) {
        if let Some(max) = self.config.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.make_room(max);
            }
        }
        self.entries.insert(key, CacheEntry::new(payload, ttl));
    }

    /// Remove one entry. Returns true if something was removed.
    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid_at(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, remaining = self.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    // Expired entries go first; if the cache is still full, drop the entry
    // closest to expiry.
    fn make_room(&self, max: usize) {
        self.sweep();
        if self.entries.len() < max {
            return;
        }
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at())
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            if self.entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waybill_core::ViewId;

    fn key(view: &str, week: u32) -> RequestKey {
        RequestKey::new(&ViewId::new(view), &json!({ "week": week }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_payload_before_ttl() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set(key("utr", 1), "payload-x".to_string());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key("utr", 1)), Some("payload-x".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_misses_after_ttl_without_sweep() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set(key("utr", 1), 7u32);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(&key("utr", 1)), None);
        // The read evicted it.
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl_override() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set_with_ttl(key("utr", 1), 1u32, Duration::from_secs(5));
        cache.set(key("utr", 2), 2u32);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&key("utr", 1)), None);
        assert_eq!(cache.get(&key("utr", 2)), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set_with_ttl(key("a", 1), 1u32, Duration::from_secs(1));
        cache.set_with_ttl(key("a", 2), 2u32, Duration::from_secs(1));
        cache.set(key("a", 3), 3u32);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("a", 3)), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_stale_returns_expired_until_evicted() {
        let cache = TtlCache::with_ttl(Duration::from_secs(1));
        cache.set(key("otd", 4), "old".to_string());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_stale(&key("otd", 4)), Some("old".to_string()));
        assert!(cache.get_entry(&key("otd", 4)).is_none());

        cache.sweep();
        assert_eq!(cache.get_stale(&key("otd", 4)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set(key("a", 1), 1u32);
        cache.set(key("a", 2), 2u32);

        assert!(cache.invalidate(&key("a", 1)));
        assert!(!cache.invalidate(&key("a", 1)));
        assert_eq!(cache.get(&key("a", 1)), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_hits_and_misses() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.set(key("a", 1), 1u32);

        cache.get(&key("a", 1));
        cache.get(&key("a", 1));
        cache.get(&key("a", 2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_closest_to_expiry() {
        let cache = TtlCache::new(
            CacheConfig::new()
                .with_ttl(Duration::from_secs(60))
                .with_max_entries(2),
        );
        cache.set_with_ttl(key("a", 1), 1u32, Duration::from_secs(10));
        cache.set(key("a", 2), 2u32);
        cache.set(key("a", 3), 3u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a", 1)), None);
        assert_eq!(cache.get(&key("a", 2)), Some(2));
        assert_eq!(cache.get(&key("a", 3)), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_lifetime() {
        let cache = TtlCache::with_ttl(Duration::from_secs(10));
        cache.set(key("a", 1), 1u32);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set(key("a", 1), 2u32);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&key("a", 1)), Some(2));
    }
}
