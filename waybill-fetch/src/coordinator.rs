//! Per-consumer fetch driver.
//!
//! A [`FetchCoordinator`] belongs to one consumer (a view, a widget). The
//! consumer reports the `(view, params)` it needs; the coordinator waits for
//! a quiet period, fetches through its [`Orchestrator`], and delivers the
//! outcome on a channel. Only results for the newest report are ever
//! delivered.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use waybill_core::{QueryParams, ViewId};

use crate::context::ActiveRequestContext;
use crate::delivery::{Delivery, DeliveryReceiver, DeliverySender, Outcome, Served};
use crate::orchestrator::Orchestrator;

/// Where a coordinator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing reported yet.
    Idle,
    /// Waiting out the debounce delay.
    Debouncing,
    /// Looking up or waiting on a result. Retries happen in this phase.
    Serving(Served),
    /// The newest report has been delivered.
    Settled,
}

struct State {
    context: Option<ActiveRequestContext>,
    generation: u64,
    phase: Phase,
    task: Option<JoinHandle<()>>,
}

struct Core {
    id: Uuid,
    orchestrator: Orchestrator,
    sender: DeliverySender,
    state: Mutex<State>,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The context if `generation` is still the newest one.
    fn current_if(&self, generation: u64) -> Option<ActiveRequestContext> {
        let state = self.lock();
        if state.generation == generation {
            state.context.clone()
        } else {
            None
        }
    }

    fn set_phase(&self, generation: u64, phase: Phase) {
        let mut state = self.lock();
        if state.generation == generation {
            state.phase = phase;
        }
    }

    // Sends under the lock so a concurrent report cannot slip in between
    // the generation check and the send.
    fn deliver(&self, generation: u64, outcome: Outcome, served: Option<Served>) -> bool {
        let mut state = self.lock();
        let context = match &state.context {
            Some(context) if state.generation == generation => context.clone(),
            _ => {
                tracing::debug!(
                    consumer = %self.id,
                    generation,
                    current = state.generation,
                    "Discarding result for superseded context"
                );
                return false;
            }
        };
        state.phase = Phase::Settled;

        let delivery = Delivery {
            context,
            outcome,
            served,
            delivered_at: Utc::now(),
        };
        if self.sender.send(delivery).is_err() {
            tracing::debug!(consumer = %self.id, generation, "Delivery receiver dropped");
            return false;
        }
        true
    }
}

async fn serve(core: Arc<Core>, generation: u64, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let Some(context) = core.current_if(generation) else {
        return;
    };

    let fetched = core.orchestrator.fetch(&context.view, &context.params);
    let served = fetched.served();
    if let Some(served) = served {
        core.set_phase(generation, Phase::Serving(served));
    }
    tracing::debug!(
        consumer = %core.id,
        generation,
        key = %context.key().fingerprint(),
        served = ?served,
        "Serving context"
    );

    let outcome = fetched.settle().await;
    core.deliver(generation, outcome, served);
}

/// Debounced, stale-suppressing fetch driver for one consumer.
///
/// Dropping the coordinator cancels its pending debounce. A network fetch
/// it already started keeps running and still fills the shared cache.
pub struct FetchCoordinator {
    core: Arc<Core>,
}

impl FetchCoordinator {
    pub(crate) fn new(orchestrator: Orchestrator) -> (Self, DeliveryReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let core = Arc::new(Core {
            id: Uuid::now_v7(),
            orchestrator,
            sender,
            state: Mutex::new(State {
                context: None,
                generation: 0,
                phase: Phase::Idle,
                task: None,
            }),
        });
        (Self { core }, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Report the request this consumer currently needs.
    ///
    /// Returns false and does nothing if `(view, params)` equals the current
    /// context. Otherwise any pending debounce is cancelled, the context is
    /// replaced, and a fetch is scheduled after the debounce delay.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn report(&self, view: impl Into<ViewId>, params: QueryParams) -> bool {
        let view = view.into();
        let mut state = self.core.lock();
        if state
            .context
            .as_ref()
            .is_some_and(|context| context.same_request(&view, &params))
        {
            return false;
        }

        state.generation += 1;
        let generation = state.generation;
        tracing::debug!(consumer = %self.core.id, generation, view = %view, "Context changed");
        state.context = Some(ActiveRequestContext::new(view, params, generation));
        self.schedule(&mut state, generation, self.core.orchestrator.config().debounce_delay);
        true
    }

    /// Drop the cached payload for the current context and fetch it again
    /// right away. Returns false if nothing was reported yet.
    pub fn refresh(&self) -> bool {
        let mut guard = self.core.lock();
        let state = &mut *guard;
        let Some(context) = state.context.as_mut() else {
            return false;
        };

        state.generation += 1;
        let generation = state.generation;
        context.generation = generation;
        self.core.orchestrator.invalidate(&context.view, &context.params);
        tracing::debug!(consumer = %self.core.id, generation, "Refreshing context");
        self.schedule(state, generation, Duration::ZERO);
        true
    }

    /// The context of the newest report.
    pub fn current(&self) -> Option<ActiveRequestContext> {
        self.core.lock().context.clone()
    }

    pub fn phase(&self) -> Phase {
        self.core.lock().phase
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.core.orchestrator
    }

    fn schedule(&self, state: &mut State, generation: u64, delay: Duration) {
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.phase = Phase::Debouncing;
        state.task = Some(tokio::spawn(serve(Arc::clone(&self.core), generation, delay)));
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.core.lock().task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
