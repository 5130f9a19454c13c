//! Badge counts that move as soon as a ticket does and settle on the backend's numbers
//! shortly after.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::{TicketChange, TicketSnapshot};
use crate::query::board::buckets_of;
use crate::query::{board_buckets, Bucket, CountScope};
use crate::store::{StoreResult, TicketStore};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1200);

type BucketFn<T, K> = dyn Fn(&T) -> Vec<K> + Send + Sync;
type ReconcileFn<K> = dyn Fn() -> BoxFuture<'static, StoreResult<BTreeMap<K, u64>>> + Send + Sync;

struct Shared<T, K> {
    counts: Mutex<BTreeMap<K, u64>>,
    buckets: Box<BucketFn<T, K>>,
    reconcile: Box<ReconcileFn<K>>,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T, K> Shared<T, K>
where
    T: Send + Sync + 'static,
    K: Ord + Clone + Send + Sync + 'static,
{
    async fn reconcile_now(&self) -> StoreResult<BTreeMap<K, u64>> {
        let fresh = (self.reconcile)().await?;
        if let Ok(mut counts) = self.counts.lock() {
            *counts = fresh.clone();
        }
        Ok(fresh)
    }

    /// Applies the delta and (re)starts the reconcile timer. `false` for a no-op move.
    fn transition(self: &Arc<Self>, old: &T, new: &T) -> bool {
        let mut from = (self.buckets)(old);
        let mut to = (self.buckets)(new);
        from.sort();
        from.dedup();
        to.sort();
        to.dedup();
        if from == to {
            return false;
        }

        if let Ok(mut counts) = self.counts.lock() {
            for key in from.iter().filter(|k| !to.contains(k)) {
                let slot = counts.entry(key.clone()).or_insert(0);
                *slot = slot.saturating_sub(1);
            }
            for key in to.iter().filter(|k| !from.contains(k)) {
                *counts.entry(key.clone()).or_insert(0) += 1;
            }
        }

        self.schedule_reconcile();
        true
    }

    /// Without a runtime the optimistic values stand until the next `refresh`.
    fn schedule_reconcile(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no async runtime, count reconcile skipped");
            return;
        };
        let shared = Arc::clone(self);
        let delay = self.debounce;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = shared.reconcile_now().await {
                tracing::warn!(error = %e, "count reconcile failed, keeping optimistic values");
            }
        });

        if let Ok(mut pending) = self.pending.lock()
            && let Some(previous) = pending.replace(handle)
        {
            previous.abort();
        }
    }
}

/// Per-bucket counts with optimistic local updates.
///
/// # Logic
/// - **Optimistic**: a transition decrements every bucket the record leaves (floored at zero)
///   and increments every bucket it enters, immediately.
/// - **Reconcile**: each transition restarts one debounce timer; when it fires the map is
///   replaced wholesale by the authoritative aggregate.
/// - **Teardown**: dropping the counter aborts the pending timer and any feed follower.
pub struct OptimisticCounter<T, K> {
    shared: Arc<Shared<T, K>>,
    followers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, K> OptimisticCounter<T, K>
where
    T: Send + Sync + 'static,
    K: Ord + Clone + Send + Sync + 'static,
{
    pub fn new<B, R>(buckets: B, reconcile: R, debounce: Duration) -> Self
    where
        B: Fn(&T) -> Vec<K> + Send + Sync + 'static,
        R: Fn() -> BoxFuture<'static, StoreResult<BTreeMap<K, u64>>> + Send + Sync + 'static,
    {
        OptimisticCounter {
            shared: Arc::new(Shared {
                counts: Mutex::new(BTreeMap::new()),
                buckets: Box::new(buckets),
                reconcile: Box::new(reconcile),
                debounce,
                pending: Mutex::new(None),
            }),
            followers: Mutex::new(Vec::new()),
        }
    }

    /// Loads the authoritative counts now.
    pub async fn refresh(&self) -> StoreResult<BTreeMap<K, u64>> {
        self.shared.reconcile_now().await
    }

    pub fn apply_transition(&self, old: &T, new: &T) -> bool {
        self.shared.transition(old, new)
    }

    pub fn snapshot(&self) -> BTreeMap<K, u64> {
        self.shared.counts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn get(&self, key: &K) -> u64 {
        self.shared
            .counts
            .lock()
            .ok()
            .and_then(|c| c.get(key).copied())
            .unwrap_or(0)
    }
}

impl<K> OptimisticCounter<TicketSnapshot, K>
where
    K: Ord + Clone + Send + Sync + 'static,
{
    /// Applies changes pushed by other sessions. Moves that leave status, acceptance
    /// and location untouched are skipped.
    pub fn follow(&self, mut rx: broadcast::Receiver<TicketChange>) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no async runtime, change feed not followed");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let handle = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        if change.changes_board_state() {
                            shared.transition(&change.old, &change.new);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "count follower lagged, forcing reconcile");
                        shared.schedule_reconcile();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Ok(mut followers) = self.followers.lock() {
            followers.push(handle);
        }
    }
}

impl<T, K> Drop for OptimisticCounter<T, K> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.shared.pending.lock()
            && let Some(handle) = pending.take()
        {
            handle.abort();
        }
        if let Ok(mut followers) = self.followers.lock() {
            for handle in followers.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Counter over the inbox and kanban columns within `scope`, reconciled from `store`.
///
/// Snapshots carry no title or requester, so only the location part of the scope is
/// applied optimistically; the text part is settled by the reconcile.
pub fn board_counter<S>(store: Arc<S>, scope: CountScope, debounce: Duration) -> OptimisticCounter<TicketSnapshot, Bucket>
where
    S: TicketStore + 'static,
{
    let tracked = board_buckets();
    let optimistic_scope = CountScope { term: None, location: scope.location.clone() }.predicate();
    let reconcile_scope = scope.predicate();
    let bucket_keys = tracked.clone();

    OptimisticCounter::new(
        move |snapshot: &TicketSnapshot| {
            if optimistic_scope.matches(snapshot) {
                buckets_of(snapshot, &bucket_keys)
            } else {
                Vec::new()
            }
        },
        move || {
            let store = Arc::clone(&store);
            let scope = reconcile_scope.clone();
            let tracked = tracked.clone();
            async move { store.count_buckets(&scope, &tracked).await }.boxed()
        },
        debounce,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use crate::realtime::ChangeFeed;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Authoritative = Arc<Mutex<BTreeMap<Status, u64>>>;

    fn status_counter(authoritative: Authoritative, calls: Arc<AtomicUsize>) -> OptimisticCounter<TicketSnapshot, Status> {
        OptimisticCounter::new(
            |s: &TicketSnapshot| vec![s.status],
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let counts = authoritative.lock().unwrap().clone();
                async move { Ok(counts) }.boxed()
            },
            DEFAULT_DEBOUNCE,
        )
    }

    fn snap(status: Status) -> TicketSnapshot {
        TicketSnapshot { id: 1, status, is_accepted: true, location: "M7".to_string() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_is_applied_then_reconciled() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::from([
            (Status::Pendiente, 0),
            (Status::EnEjecucion, 4),
        ])));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(Arc::clone(&authoritative), Arc::clone(&calls));
        counter.refresh().await.unwrap();

        assert!(counter.apply_transition(&snap(Status::Pendiente), &snap(Status::EnEjecucion)));
        // floored at zero
        assert_eq!(counter.get(&Status::Pendiente), 0);
        assert_eq!(counter.get(&Status::EnEjecucion), 5);

        *authoritative.lock().unwrap() = BTreeMap::from([(Status::Pendiente, 2), (Status::EnEjecucion, 7)]);
        tokio::time::sleep(Duration::from_millis(1300)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(counter.snapshot(), *authoritative.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_transition_is_ignored() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::from([(Status::Pendiente, 3)])));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(authoritative, Arc::clone(&calls));
        counter.refresh().await.unwrap();

        assert!(!counter.apply_transition(&snap(Status::Pendiente), &snap(Status::Pendiente)));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(counter.get(&Status::Pendiente), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_edit_restarts_debounce() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(authoritative, Arc::clone(&calls));

        counter.apply_transition(&snap(Status::Pendiente), &snap(Status::EnEjecucion));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        counter.apply_transition(&snap(Status::EnEjecucion), &snap(Status::Finalizadas));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_reconcile() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(authoritative, Arc::clone(&calls));

        counter.apply_transition(&snap(Status::Pendiente), &snap(Status::EnEjecucion));
        drop(counter);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconcile_keeps_optimistic_values() {
        let counter: OptimisticCounter<TicketSnapshot, Status> = OptimisticCounter::new(
            |s: &TicketSnapshot| vec![s.status],
            || async { Err::<BTreeMap<Status, u64>, _>(StoreError::Backend("offline".to_string())) }.boxed(),
            DEFAULT_DEBOUNCE,
        );
        counter.apply_transition(&snap(Status::Pendiente), &snap(Status::Finalizadas));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.get(&Status::Finalizadas), 1);
    }

    #[test]
    fn test_transition_outside_runtime_applies_delta() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(authoritative, Arc::clone(&calls));

        assert!(counter.apply_transition(&snap(Status::Pendiente), &snap(Status::Finalizadas)));
        assert_eq!(counter.get(&Status::Finalizadas), 1);
        assert_eq!(counter.get(&Status::Pendiente), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        counter.follow(ChangeFeed::new().subscribe());
        drop(counter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_feed_changes() {
        let authoritative: Authoritative = Arc::new(Mutex::new(BTreeMap::from([(Status::Pendiente, 1)])));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = status_counter(authoritative, calls);
        counter.refresh().await.unwrap();

        let feed = ChangeFeed::new();
        counter.follow(feed.subscribe());

        let mut renamed = snap(Status::Pendiente);
        renamed.id = 2;
        feed.publish(TicketChange { old: renamed.clone(), new: renamed });
        feed.publish(TicketChange { old: snap(Status::Pendiente), new: snap(Status::EnEjecucion) });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(counter.get(&Status::Pendiente), 0);
        assert_eq!(counter.get(&Status::EnEjecucion), 1);
    }
}
