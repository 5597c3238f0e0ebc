//! Cache entries and their validity rules.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// A cached payload with its lifetime.
///
/// Validity is measured on the monotonic clock (`created_at`); `stored_at`
/// is the wall-clock time kept for display ("updated 2 minutes ago").
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    payload: V,
    created_at: Instant,
    ttl: Duration,
    stored_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped with the current time.
    pub fn new(payload: V, ttl: Duration) -> Self {
        Self::at(payload, Instant::now(), ttl)
    }

    /// Create an entry with an explicit creation instant.
    pub fn at(payload: V, created_at: Instant, ttl: Duration) -> Self {
        Self {
            payload,
            created_at,
            ttl,
            stored_at: Utc::now(),
        }
    }

    /// Returns true iff `now - created_at < ttl`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }

    /// Returns true if the entry is valid right now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Instant at which the entry stops being valid.
    pub fn expires_at(&self) -> Instant {
        self.created_at
            .checked_add(self.ttl)
            .unwrap_or(self.created_at + Duration::from_secs(u32::MAX as u64))
    }

    /// Lifetime left at `now`, zero once expired.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at().saturating_duration_since(now)
    }

    /// Time elapsed since the entry was created.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn payload(&self) -> &V {
        &self.payload
    }

    pub fn into_payload(self) -> V {
        self.payload
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }
}
