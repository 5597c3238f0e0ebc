//! Single-flight registry of in-flight fetches.
//!
//! At most one operation runs per [`RequestKey`]. The first submission
//! starts it; later submissions for the same key receive a clone of the
//! same shared future and observe the same outcome. The entry removes
//! itself when the operation settles, success or failure, exactly once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use waybill_core::RequestKey;

/// Handle to an in-flight operation. Cloneable; every clone resolves to the
/// same result.
pub type SharedFetch<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Whether a submission started a new operation or joined one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Started,
    Joined,
}

struct Slot<T, E> {
    ticket: u64,
    future: SharedFetch<T, E>,
}

type Slots<T, E> = Arc<DashMap<RequestKey, Slot<T, E>>>;

/// Removes the slot it was created for when dropped: on settlement, on
/// panic inside the operation, or if the driver is torn down. The ticket
/// guard keeps a late drop from removing a newer slot for the same key.
struct SlotGuard<T, E> {
    slots: Slots<T, E>,
    key: RequestKey,
    ticket: u64,
}

impl<T, E> Drop for SlotGuard<T, E> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.slots.remove_if(&self.key, |_, slot| slot.ticket == ticket);
    }
}

/// Map from request key to the in-flight operation for that key.
pub struct PendingRegistry<T, E> {
    slots: Slots<T, E>,
    next_ticket: AtomicU64,
}

impl<T, E> Default for PendingRegistry<T, E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }
}

impl<T, E> PendingRegistry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the in-flight operation for `key`, starting one with `factory`
    /// if none exists.
    ///
    /// The check and the insert happen under the key's map slot, so two
    /// interleaved submissions can never both start an operation. The new
    /// operation is spawned onto the runtime and runs to completion even if
    /// every caller stops awaiting it.
    ///
    /// `factory` runs while the slot is held and must not call back into
    /// this registry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_create<F, Fut>(&self, key: &RequestKey, factory: F) -> (SharedFetch<T, E>, Submission)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.get_or_admit(key, || Ok::<(), Infallible>(()), factory) {
            Ok(submitted) => submitted,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_create`](Self::get_or_create), but a new operation is
    /// only started if `admit` accepts it. Joining an operation already in
    /// flight never consults `admit`.
    ///
    /// `admit` runs under the same slot as the check and the insert, so no
    /// other submission for `key` can start or join between the decision
    /// and the start.
    pub fn get_or_admit<A, R, F, Fut>(
        &self,
        key: &RequestKey,
        admit: A,
        factory: F,
    ) -> Result<(SharedFetch<T, E>, Submission), R>
    where
        A: FnOnce() -> Result<(), R>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = match self.slots.entry(key.clone()) {
            Entry::Occupied(slot) => return Ok((slot.get().future.clone(), Submission::Joined)),
            Entry::Vacant(vacant) => {
                admit()?;
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let guard = SlotGuard {
                    slots: Arc::clone(&self.slots),
                    key: key.clone(),
                    ticket,
                };
                let operation = factory();
                let shared = async move {
                    let _guard = guard;
                    operation.await
                }
                .boxed()
                .shared();
                vacant.insert(Slot {
                    ticket,
                    future: shared.clone(),
                });
                shared
            }
        };

        tokio::spawn(shared.clone());
        Ok((shared, Submission::Started))
    }

    /// The in-flight operation for `key`, if any.
    pub fn get(&self, key: &RequestKey) -> Option<SharedFetch<T, E>> {
        self.slots.get(key).map(|slot| slot.future.clone())
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use waybill_core::ViewId;

    fn key(week: u32) -> RequestKey {
        RequestKey::new(&ViewId::new("utr"), &json!({ "week": week }))
    }

    #[tokio::test]
    async fn test_concurrent_submissions_share_one_operation() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counter = Arc::clone(&calls);
        let (first, first_kind) = registry.get_or_create(&key(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = gate.await;
            Ok(42)
        });

        let counter = Arc::clone(&calls);
        let (second, second_kind) = registry.get_or_create(&key(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });

        assert_eq!(first_kind, Submission::Started);
        assert_eq!(second_kind, Submission::Joined);
        assert_eq!(registry.len(), 1);

        let _ = release.send(());
        assert_eq!(first.await, Ok(42));
        assert_eq!(second.await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_success() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let (fetch, _) = registry.get_or_create(&key(1), || async { Ok(1) });

        assert_eq!(fetch.await, Ok(1));
        assert!(!registry.contains(&key(1)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_entry_removed_after_failure_and_shared() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let (release, gate) = oneshot::channel::<()>();
        let (first, _) = registry.get_or_create(&key(2), move || async move {
            let _ = gate.await;
            Err("boom".to_string())
        });
        let joined = registry.get(&key(2)).unwrap();

        let _ = release.send(());
        assert_eq!(first.await, Err("boom".to_string()));
        assert_eq!(joined.await, Err("boom".to_string()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_runs_to_completion_without_awaiting_callers() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let (fetch, _) = registry.get_or_create(&key(3), move || async move {
            let _ = done_tx.send(());
            Ok(3)
        });
        drop(fetch);

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        tokio::task::yield_now().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_new_submission_after_settlement_starts_again() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let counter = Arc::clone(&calls);
            let (fetch, kind) = registry.get_or_create(&key(4), move || async move {
                Ok(counter.fetch_add(1, Ordering::SeqCst) as u32 + 1)
            });
            assert_eq!(kind, Submission::Started);
            assert_eq!(fetch.await, Ok(expected));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let (a, a_kind) = registry.get_or_create(&key(5), || async { Ok(5) });
        let (b, b_kind) = registry.get_or_create(&key(6), || async { Ok(6) });

        assert_eq!(a_kind, Submission::Started);
        assert_eq!(b_kind, Submission::Started);
        assert_eq!(a.await, Ok(5));
        assert_eq!(b.await, Ok(6));
    }

    #[tokio::test]
    async fn test_admission_only_gates_new_operations() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let admissions = AtomicUsize::new(0);
        let admit = || {
            admissions.fetch_add(1, Ordering::SeqCst);
            Ok::<(), &str>(())
        };
        let (release, gate) = oneshot::channel::<()>();

        let (first, first_kind) = registry
            .get_or_admit(&key(7), admit, move || async move {
                let _ = gate.await;
                Ok(7)
            })
            .unwrap();
        let (joined, joined_kind) = registry
            .get_or_admit(
                &key(7),
                || -> Result<(), &str> { panic!("joining must not be gated") },
                || async { Ok(0) },
            )
            .unwrap();

        assert_eq!(first_kind, Submission::Started);
        assert_eq!(joined_kind, Submission::Joined);
        assert_eq!(admissions.load(Ordering::SeqCst), 1);

        let _ = release.send(());
        assert_eq!(first.await, Ok(7));
        assert_eq!(joined.await, Ok(7));
    }

    #[tokio::test]
    async fn test_refused_admission_starts_nothing() {
        let registry: PendingRegistry<u32, String> = PendingRegistry::new();
        let started = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&started);
        let refused = registry.get_or_admit(&key(8), || Err("busy"), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(8)
        });

        assert!(matches!(refused, Err("busy")));
        assert!(registry.is_empty());
        tokio::task::yield_now().await;
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }
}
