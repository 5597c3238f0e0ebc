//! Bounded retry with backoff.
//!
//! Transient server faults back off exponentially; rate-limit rejections
//! back off along a steeper linear curve. Permanent failures, and kinds the
//! policy disables, return on first occurrence.

use std::future::Future;
use std::time::Duration;
use waybill_core::{ErrorKind, RemoteError, RemoteResult, RetryPolicy};

/// A scheduled retry, handed to the observer before the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Zero-based index of this retry within the logical request.
    pub attempt: u32,
    pub kind: ErrorKind,
    pub delay: Duration,
}

/// Delay before retry number `attempt` (zero-based) of a failure of `kind`.
///
/// - rate limited: `initial_delay * 2 * (attempt + 1)`
/// - transient: `initial_delay * backoff_multiplier ^ attempt`
///
/// Both are capped at `max_delay`. Permanent failures get no delay.
pub fn compute_delay(kind: ErrorKind, attempt: u32, policy: &RetryPolicy) -> Duration {
    let delay = match kind {
        ErrorKind::RateLimited => policy
            .initial_delay
            .saturating_mul(attempt.saturating_add(1).saturating_mul(2)),
        ErrorKind::TransientServer => scale(
            policy.initial_delay,
            policy.backoff_multiplier.powf(f64::from(attempt)),
        ),
        ErrorKind::Permanent => Duration::ZERO,
    };
    delay.min(policy.max_delay)
}

fn scale(base: Duration, factor: f64) -> Duration {
    let nanos = base.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        Duration::MAX
    } else if nanos <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

/// Run `operation` until it succeeds or the policy gives up.
pub async fn execute<T, F, Fut>(operation: F, policy: &RetryPolicy) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    execute_with(operation, policy, |_, _| {}).await
}

/// Like [`execute`], calling `observer` with each scheduled retry and the
/// error that caused it before waiting.
pub async fn execute_with<T, F, Fut, O>(
    mut operation: F,
    policy: &RetryPolicy,
    mut observer: O,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
    O: FnMut(&RetryAttempt, &RemoteError),
{
    let mut attempt: u32 = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let kind = err.kind();
        if !policy.allows(kind) {
            tracing::debug!(kind = %kind, error = %err.message(), "Not retrying");
            return Err(err);
        }
        if attempt >= policy.max_retries {
            tracing::warn!(
                kind = %kind,
                attempts = attempt + 1,
                error = %err.message(),
                "Retries exhausted"
            );
            return Err(err);
        }

        let delay = compute_delay(kind, attempt, policy);
        let scheduled = RetryAttempt {
            attempt,
            kind,
            delay,
        };
        observer(&scheduled, &err);
        tracing::warn!(
            kind = %kind,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err.message(),
            "Remote call failed, retrying"
        );

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

// =============================================================================
// TESTS
// =============================================================================
