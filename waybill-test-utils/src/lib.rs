//! WAYBILL Test Utilities
//!
//! Shared test infrastructure for the WAYBILL workspace:
//! - A scripted mock backend standing in for the remote service
//! - Proptest generators for keys, parameters and policies
//! - Fixtures with short, test-friendly timings
//! - Assertions on classified errors

pub use waybill_client::RemoteBackend;
pub use waybill_core::{
    ErrorKind, FetchConfig, QueryParams, RateLimitConfig, RemoteError, RemoteResult, RequestKey,
    RetryPolicy, ViewId,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// MOCK BACKEND
// ============================================================================

/// One recorded invocation of the mock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub procedure: String,
    pub params: Value,
}

/// Remote backend that replays a script of responses.
///
/// Responses are consumed in order. Once the script runs dry every call
/// echoes its procedure and parameters back as
/// `{"procedure": ..., "params": ...}`. An optional latency is applied to
/// every call with `tokio::time::sleep`, so it follows paused test time.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<RemoteResult<Value>>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
    latency: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a successful response.
    pub fn push_ok(&self, value: Value) -> &Self {
        lock(&self.script).push_back(Ok(value));
        self
    }

    /// Queue a failure.
    pub fn push_err(&self, err: RemoteError) -> &Self {
        lock(&self.script).push_back(Err(err));
        self
    }

    /// Queue the same failure `times` times.
    pub fn push_errs(&self, err: RemoteError, times: usize) -> &Self {
        let mut script = lock(&self.script);
        for _ in 0..times {
            script.push_back(Err(err.clone()));
        }
        drop(script);
        self
    }

    /// Total calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Calls made so far for one procedure.
    pub fn calls_for(&self, procedure: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.procedure == procedure)
            .count()
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    /// The value an exhausted script answers with.
    pub fn echo(procedure: &str, params: &Value) -> Value {
        json!({ "procedure": procedure, "params": params })
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    async fn call(&self, procedure: &str, params: &Value) -> RemoteResult<Value> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(RecordedCall {
            procedure: procedure.to_string(),
            params: params.clone(),
        });
        let next = lock(&self.script).pop_front();

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        next.unwrap_or_else(|| Ok(Self::echo(procedure, params)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for WAYBILL types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a view identifier.
    pub fn arb_view_id() -> impl Strategy<Value = ViewId> {
        "[a-z][a-z_]{0,15}".prop_map(ViewId::new)
    }

    /// Generate a scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
        ]
    }

    /// Generate a flat parameter object, the shape views report.
    pub fn arb_params() -> impl Strategy<Value = QueryParams> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_scalar(), 0..6)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    }

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::TransientServer),
            Just(ErrorKind::RateLimited),
            Just(ErrorKind::Permanent),
        ]
    }

    /// Generate a valid retry policy.
    pub fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
        (0u32..5, 1u64..5_000, 0u64..20_000, 1.0f64..3.0).prop_map(
            |(max_retries, initial_ms, extra_ms, multiplier)| {
                RetryPolicy::new()
                    .with_max_retries(max_retries)
                    .with_initial_delay(Duration::from_millis(initial_ms))
                    .with_max_delay(Duration::from_millis(initial_ms + extra_ms))
                    .with_backoff_multiplier(multiplier)
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Fetch configuration with short timings for tests.
    pub fn test_fetch_config() -> FetchConfig {
        FetchConfig::new()
            .with_ttl(Duration::from_secs(60))
            .with_debounce(Duration::from_millis(50))
            .with_request_timeout(Duration::from_secs(5))
            .with_retry(
                RetryPolicy::new()
                    .with_max_retries(2)
                    .with_initial_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_secs(1)),
            )
            .with_rate_limit(RateLimitConfig::new(Duration::from_secs(1), 5))
    }

    /// Same as [`test_fetch_config`] without retries.
    pub fn no_retry_config() -> FetchConfig {
        test_fetch_config().with_retry(RetryPolicy::no_retry())
    }

    /// Parameters for a weekly view.
    pub fn week_params(week: u32) -> QueryParams {
        json!({ "week": week, "region": "north" })
    }

    pub fn transient_error() -> RemoteError {
        RemoteError::transient("Internal Server Error").with_status(500)
    }

    pub fn rate_limited_error() -> RemoteError {
        RemoteError::rate_limited("Too Many Requests").with_status(429)
    }

    pub fn permanent_error() -> RemoteError {
        RemoteError::permanent("permission denied for function").with_status(403)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on remote results.

    use super::*;

    /// Assert that a result failed with the given kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &RemoteResult<T>, kind: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), kind, "Wrong error kind: {:?}", err),
            Ok(value) => panic!("Expected {} error, got Ok({:?})", kind, value),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
