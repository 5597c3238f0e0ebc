//! Per-key trailing-window rate limiting.
//!
//! Each key keeps the instants of its accepted submissions. A submission is
//! rejected when the window already holds `threshold` of them; rejected
//! submissions are not recorded, so a key recovers as soon as its oldest
//! accepted submission ages out. Keys never affect each other.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use waybill_core::{RateLimitConfig, RequestKey};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Too many submissions in the window. `retry_after` is the time until
    /// the oldest one leaves it.
    Rejected { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Trailing-window limiter keyed by request key.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<RequestKey, VecDeque<Instant>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check a submission for `key`, recording it if allowed.
    pub fn check(&self, key: &RequestKey) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(key.clone()).or_default();
        prune(&mut window, now, self.config.window);

        if window.len() >= self.config.threshold as usize {
            let span = self.config.window;
            // A window past the clock's range never expires; report it whole.
            let retry_after = window
                .front()
                .and_then(|oldest| oldest.checked_add(span))
                .map_or(span, |end| end.saturating_duration_since(now));
            tracing::debug!(
                key = %key.fingerprint(),
                in_window = window.len(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Submission rejected by rate limiter"
            );
            RateDecision::Rejected { retry_after }
        } else {
            window.push_back(now);
            RateDecision::Allowed
        }
    }

    /// Number of accepted submissions for `key` still inside the window.
    pub fn in_window(&self, key: &RequestKey) -> usize {
        let now = Instant::now();
        self.windows
            .get(key)
            .map(|window| {
                window
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) < self.config.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Forget all history for `key`.
    pub fn reset(&self, key: &RequestKey) {
        self.windows.remove(key);
    }

    /// Drop windows that no longer hold any live submission. Returns how many
    /// keys were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            prune(stamps, now, window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of keys with a tracked window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = stamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            stamps.pop_front();
        } else {
            break;
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

    fn key(view: &str) -> RequestKey {
        RequestKey::new(&ViewId::new(view), &json!({ "week": 1 }))
    }

    fn limiter(window_ms: u64, threshold: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::new(
            Duration::from_millis(window_ms),
            threshold,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_rapid_submissions_threshold_five() {
        let limiter = limiter(1000, 5);
        let decisions: Vec<RateDecision> = (0..10).map(|_| limiter.check(&key("utr"))).collect();

        let accepted = decisions.iter().filter(|d| d.is_allowed()).count();
        assert_eq!(accepted, 5);
        assert_eq!(decisions.len() - accepted, 5);
        assert!(decisions[..5].iter().all(RateDecision::is_allowed));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(limiter.check(&key("utr")).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_reports_retry_after() {
        let limiter = limiter(1000, 2);
        assert!(limiter.check(&key("a")).is_allowed());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(limiter.check(&key("a")).is_allowed());

        match limiter.check(&key("a")) {
            RateDecision::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(700));
            }
            RateDecision::Allowed => panic!("expected rejection"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(1000, 2);
        assert!(limiter.check(&key("a")).is_allowed());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.check(&key("a")).is_allowed());
        assert!(!limiter.check(&key("a")).is_allowed());

        // First submission ages out, second is still in the window.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.check(&key("a")).is_allowed());
        assert!(!limiter.check(&key("a")).is_allowed());
        assert_eq!(limiter.in_window(&key("a")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1000, 1);
        assert!(limiter.check(&key("a")).is_allowed());
        assert!(!limiter.check(&key("a")).is_allowed());
        assert!(limiter.check(&key("b")).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_reset() {
        let limiter = limiter(1000, 1);
        limiter.check(&key("a"));
        limiter.check(&key("b"));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.reset(&key("a"));
        assert!(limiter.check(&key("a")).is_allowed());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_window_rejects_without_overflow() {
        let limiter = limiter(u64::MAX, 1);
        assert!(limiter.check(&key("a")).is_allowed());

        tokio::time::advance(Duration::from_secs(3600)).await;
        match limiter.check(&key("a")) {
            RateDecision::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(u64::MAX));
            }
            RateDecision::Allowed => panic!("expected rejection"),
        }
        assert_eq!(limiter.in_window(&key("a")), 1);
        assert_eq!(limiter.sweep(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_burst_accepts_exactly_threshold(submissions in 0usize..40, threshold in 1u32..20) {
            let limiter = limiter(60_000, threshold);
            let accepted = (0..submissions)
                .filter(|_| limiter.check(&key("burst")).is_allowed())
                .count();
            proptest::prop_assert_eq!(accepted, submissions.min(threshold as usize));
            proptest::prop_assert_eq!(limiter.in_window(&key("burst")), accepted);
        }
    }
}
