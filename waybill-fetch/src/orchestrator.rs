//! Shared fetch state for one data source.
//!
//! An [`Orchestrator`] owns the backend, the TTL cache, the single-flight
//! registry and the rate limiter that every coordinator of the same data
//! source consults. It is cheap to clone; clones share all state.

use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::Instrument;
use waybill_client::RemoteBackend;
use waybill_core::{FetchConfig, QueryParams, RemoteError, RemoteResult, RequestKey, ViewId};
use waybill_storage::{
    CacheStats, PendingRegistry, RateDecision, RateLimiter, SharedFetch, Submission, TtlCache,
};

use crate::coordinator::FetchCoordinator;
use crate::delivery::{DeliveryReceiver, Outcome, Payload, Served};
use crate::retry;

// ============================================================================
// FETCH RESULT
// ============================================================================

/// Result of one undebounced lookup.
pub enum Fetched {
    /// Live cache entry. No network involved.
    Cached(Payload),
    /// Joined a fetch already in flight for the same key.
    Joined(SharedFetch<Payload, RemoteError>),
    /// Started a new network fetch.
    Started(SharedFetch<Payload, RemoteError>),
    /// Refused by the rate limiter.
    Deferred {
        retry_after: Duration,
        last_known: Option<Payload>,
    },
}

impl Fetched {
    pub fn served(&self) -> Option<Served> {
        match self {
            Self::Cached(_) => Some(Served::Cache),
            Self::Joined(_) => Some(Served::Pending),
            Self::Started(_) => Some(Served::Network),
            Self::Deferred { .. } => None,
        }
    }

    /// Wait for the final outcome.
    pub async fn settle(self) -> Outcome {
        match self {
            Self::Cached(payload) => Outcome::Ready(payload),
            Self::Joined(fetch) | Self::Started(fetch) => match fetch.await {
                Ok(payload) => Outcome::Ready(payload),
                Err(err) => Outcome::Failed(err),
            },
            Self::Deferred {
                retry_after,
                last_known,
            } => Outcome::Deferred {
                retry_after,
                last_known,
            },
        }
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub rate_windows: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.cache_entries + self.rate_windows
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

struct Inner {
    backend: Arc<dyn RemoteBackend>,
    cache: TtlCache<Payload>,
    pending: PendingRegistry<Payload, RemoteError>,
    limiter: RateLimiter,
    routes: DashMap<ViewId, String>,
    config: FetchConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new<B: RemoteBackend + 'static>(backend: Arc<B>, config: FetchConfig) -> Self {
        let backend: Arc<dyn RemoteBackend> = backend;
        Self {
            inner: Arc::new(Inner {
                backend,
                cache: TtlCache::with_ttl(config.ttl),
                pending: PendingRegistry::new(),
                limiter: RateLimiter::new(config.rate_limit.clone()),
                routes: DashMap::new(),
                config,
            }),
        }
    }

    /// Map a view to the remote procedure that serves it. Unrouted views
    /// call the procedure with the view's own name.
    pub fn with_route(self, view: impl Into<ViewId>, procedure: impl Into<String>) -> Self {
        self.inner.routes.insert(view.into(), procedure.into());
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.config
    }

    /// Create a coordinator for one consumer, with the receiving end of its
    /// delivery channel.
    pub fn coordinator(&self) -> (FetchCoordinator, DeliveryReceiver) {
        FetchCoordinator::new(self.clone())
    }

    pub fn procedure_for(&self, view: &ViewId) -> String {
        self.inner
            .routes
            .get(view)
            .map(|procedure| procedure.value().clone())
            .unwrap_or_else(|| view.as_str().to_string())
    }

    /// Look `(view, params)` up without debouncing: cache, then in-flight
    /// fetches, then the rate limiter, and finally a new network fetch.
    ///
    /// Only a fetch that would start a network call is checked against the
    /// rate limit; joining one in flight costs nothing. The check and the
    /// start are a single step per key.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fetch(&self, view: &ViewId, params: &QueryParams) -> Fetched {
        let key = RequestKey::new(view, params);
        let last_known = self.inner.cache.get_stale(&key);

        if let Some(payload) = self.inner.cache.get(&key) {
            tracing::debug!(key = %key.fingerprint(), view = %view, "Cache hit");
            return Fetched::Cached(payload);
        }

        let procedure = self.procedure_for(view);
        let submitted = self.inner.pending.get_or_admit(
            &key,
            || match self.inner.limiter.check(&key) {
                RateDecision::Allowed => Ok(()),
                RateDecision::Rejected { retry_after } => Err(retry_after),
            },
            || self.network_fetch(key.clone(), procedure, params.clone()),
        );
        match submitted {
            Ok((fetch, Submission::Started)) => Fetched::Started(fetch),
            Ok((fetch, Submission::Joined)) => {
                tracing::debug!(key = %key.fingerprint(), view = %view, "Joining in-flight fetch");
                Fetched::Joined(fetch)
            }
            Err(retry_after) => Fetched::Deferred {
                retry_after,
                last_known,
            },
        }
    }

    /// [`fetch`](Self::fetch) and wait for the outcome.
    pub async fn load(&self, view: &ViewId, params: &QueryParams) -> Outcome {
        self.fetch(view, params).settle().await
    }

    /// Drop the cached payload for `(view, params)`. Returns true if one
    /// was held.
    pub fn invalidate(&self, view: &ViewId, params: &QueryParams) -> bool {
        self.inner.cache.invalidate(&RequestKey::new(view, params))
    }

    /// Remove expired cache entries and drained rate windows.
    pub fn sweep(&self) -> SweepReport {
        SweepReport {
            cache_entries: self.inner.cache.sweep(),
            rate_windows: self.inner.limiter.sweep(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Sweep every `every` until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub fn spawn_sweeper(&self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = every.as_millis() as u64, "Sweeper started");

            let mut swept = SweepReport::default();
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let report = orchestrator.sweep();
                        if report.total() > 0 {
                            tracing::debug!(
                                cache_entries = report.cache_entries,
                                rate_windows = report.rate_windows,
                                "Swept expired state"
                            );
                        }
                        swept.cache_entries += report.cache_entries;
                        swept.rate_windows += report.rate_windows;
                    }
                }
            }

            tracing::info!(
                cache_entries = swept.cache_entries,
                rate_windows = swept.rate_windows,
                "Sweeper shutting down"
            );
        })
    }

    // The returned future owns everything it needs: it is driven by the
    // registry's spawned task and may outlive every caller. It writes the
    // cache itself so a superseded fetch still warms it.
    fn network_fetch(
        &self,
        key: RequestKey,
        procedure: String,
        params: QueryParams,
    ) -> impl Future<Output = RemoteResult<Payload>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("fetch", key = %key.fingerprint(), procedure = %procedure);

        async move {
            let timeout = inner.config.request_timeout;
            let timeout_is_transient = inner.config.timeout_is_transient;
            let result = retry::execute(
                || {
                    call_with_timeout(
                        inner.backend.as_ref(),
                        &procedure,
                        &params,
                        timeout,
                        timeout_is_transient,
                    )
                },
                &inner.config.retry,
            )
            .await;

            match result {
                Ok(value) => {
                    let payload = Arc::new(value);
                    inner.cache.set(key, Arc::clone(&payload));
                    tracing::debug!("Fetch settled, cached");
                    Ok(payload)
                }
                Err(err) => {
                    tracing::debug!(kind = %err.kind(), error = %err.message(), "Fetch failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
    }
}

async fn call_with_timeout(
    backend: &dyn RemoteBackend,
    procedure: &str,
    params: &Value,
    timeout: Duration,
    timeout_is_transient: bool,
) -> RemoteResult<Value> {
    match tokio::time::timeout(timeout, backend.call(procedure, params)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(timeout, timeout_is_transient)),
    }
}

// =============================================================================
// TESTS
// =============================================================================
