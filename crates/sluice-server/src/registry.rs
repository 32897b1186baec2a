//! Subscription registry and capture-worker policy.
//!
//! Every destination owns one async lock. Subscribe, unsubscribe and the
//! last-subscriber check-and-stop each run entirely under that lock, worker
//! calls included, so a subscribe racing a stop waits for the stop and then
//! starts the worker again. Different destinations never contend.
//!
//! Destination slots are never removed once created; the lock for a name is
//! stable for the life of the registry.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use sluice_core::{
    ClientIdentity, CollaboratorResult, Destination, FilterInstaller, WorkerLifecycle,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::{WORKER_STARTS_TOTAL, WORKER_STOPS_TOTAL};

#[derive(Debug, Default)]
struct DestinationState {
    subscribers: HashSet<ClientIdentity>,
    running: bool,
}

/// What a successful subscribe changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// The identity was not registered before.
    pub newly_registered: bool,
    /// This call started the capture worker.
    pub worker_started: bool,
}

/// What an unsubscribe changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    /// The identity was registered and has been removed.
    pub removed: bool,
    /// This call stopped the capture worker.
    pub worker_stopped: bool,
}

/// Point-in-time view of one destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DestinationSummary {
    /// Destination name.
    pub destination: Destination,
    /// Registered subscribers.
    pub subscribers: usize,
    /// Whether the capture worker was running at last observation.
    pub running: bool,
}

/// Registered subscribers per destination, plus the worker start/stop policy.
pub struct SubscriptionRegistry {
    destinations: DashMap<Destination, Arc<Mutex<DestinationState>>>,
    workers: Arc<dyn WorkerLifecycle>,
    filters: Arc<dyn FilterInstaller>,
}

impl SubscriptionRegistry {
    /// Create an empty registry driving the given backends.
    pub fn new(workers: Arc<dyn WorkerLifecycle>, filters: Arc<dyn FilterInstaller>) -> Self {
        Self {
            destinations: DashMap::new(),
            workers,
            filters,
        }
    }

    fn slot(&self, destination: &Destination) -> Arc<Mutex<DestinationState>> {
        self.destinations
            .entry(destination.clone())
            .or_default()
            .value()
            .clone()
    }

    /// Register `identity`, install its filter and make sure the worker runs.
    ///
    /// Re-subscribing replaces the stored identity (and so its filter). The
    /// identity is only stored once the filter and worker calls succeed, so a
    /// failed or panicking subscribe leaves any previous registration as it
    /// was.
    pub async fn subscribe(&self, identity: &ClientIdentity) -> CollaboratorResult<SubscribeOutcome> {
        let destination = identity.destination();
        let slot = self.slot(destination);
        let mut state = slot.lock().await;

        let newly_registered = !state.subscribers.contains(identity);
        let worker_started = match self.install_and_start(destination, identity, &mut state).await {
            Ok(started) => started,
            Err(err) => {
                warn!(subscriber = %identity, error = %err, "subscribe failed, nothing registered");
                return Err(err);
            }
        };

        let _ = state.subscribers.replace(identity.clone());
        debug!(subscriber = %identity, newly_registered, "subscriber registered");
        Ok(SubscribeOutcome {
            newly_registered,
            worker_started,
        })
    }

    async fn install_and_start(
        &self,
        destination: &Destination,
        identity: &ClientIdentity,
        state: &mut DestinationState,
    ) -> CollaboratorResult<bool> {
        if let Some(filter) = identity.filter() {
            self.filters.set_filter(destination, filter).await?;
        }

        if self.workers.is_running(destination).await {
            state.running = true;
            return Ok(false);
        }

        self.workers.start(destination).await?;
        state.running = true;
        counter!(WORKER_STARTS_TOTAL).increment(1);
        info!(%destination, "capture worker started for first subscriber");
        Ok(true)
    }

    /// Apply the last-subscriber-stop policy for `identity`, then remove it.
    ///
    /// A failed stop leaves the registration in place.
    pub async fn unsubscribe(&self, identity: &ClientIdentity) -> CollaboratorResult<UnsubscribeOutcome> {
        let slot = self.slot(identity.destination());
        let mut state = slot.lock().await;

        let worker_stopped = self.stop_if_last_locked(identity, &mut state).await?;
        let removed = state.subscribers.remove(identity);
        debug!(subscriber = %identity, removed, "subscriber removed");
        Ok(UnsubscribeOutcome {
            removed,
            worker_stopped,
        })
    }

    /// Apply the last-subscriber-stop policy without touching registrations.
    ///
    /// Used when a bound connection closes. Returns whether the worker was
    /// stopped.
    pub async fn release(&self, identity: &ClientIdentity) -> CollaboratorResult<bool> {
        let slot = self.slot(identity.destination());
        let mut state = slot.lock().await;
        self.stop_if_last_locked(identity, &mut state).await
    }

    async fn stop_if_last_locked(
        &self,
        identity: &ClientIdentity,
        state: &mut DestinationState,
    ) -> CollaboratorResult<bool> {
        let sole = state.subscribers.len() == 1 && state.subscribers.contains(identity);
        if !sole {
            return Ok(false);
        }

        let destination = identity.destination();
        if !self.workers.is_running(destination).await {
            state.running = false;
            return Ok(false);
        }

        self.workers.stop(destination).await?;
        state.running = false;
        counter!(WORKER_STOPS_TOTAL).increment(1);
        info!(%destination, subscriber = %identity, "last subscriber left, capture worker stopped");
        Ok(true)
    }

    /// Subscribers of a destination, ordered by client id.
    pub async fn list_subscribers(&self, destination: &Destination) -> Vec<ClientIdentity> {
        let Some(slot) = self.destinations.get(destination).map(|s| s.value().clone()) else {
            return Vec::new();
        };
        let state = slot.lock().await;
        let mut subscribers: Vec<_> = state.subscribers.iter().cloned().collect();
        subscribers.sort_by_key(ClientIdentity::client_id);
        subscribers
    }

    /// Whether `identity` is registered.
    pub async fn is_registered(&self, identity: &ClientIdentity) -> bool {
        let Some(slot) = self.destinations.get(identity.destination()).map(|s| s.value().clone()) else {
            return false;
        };
        slot.lock().await.subscribers.contains(identity)
    }

    /// Summary of every known destination, sorted by name.
    pub async fn snapshot(&self) -> Vec<DestinationSummary> {
        let slots: Vec<_> = self
            .destinations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut summaries = Vec::with_capacity(slots.len());
        for (destination, slot) in slots {
            let state = slot.lock().await;
            summaries.push(DestinationSummary {
                destination,
                subscribers: state.subscribers.len(),
                running: state.running,
            });
        }
        summaries.sort_by(|a, b| a.destination.cmp(&b.destination));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use sluice_core::{ClientId, CollaboratorError};
    use sluice_store::{LocalWorkerController, MemoryEventStore, WorkerCounts};

    fn dest(name: &str) -> Destination {
        Destination::new(name).unwrap()
    }

    fn id(destination: &str, client: i16) -> ClientIdentity {
        ClientIdentity::new(dest(destination), ClientId::new(client), None)
    }

    fn registry() -> (SubscriptionRegistry, Arc<LocalWorkerController>, Arc<MemoryEventStore>) {
        let workers = Arc::new(LocalWorkerController::new());
        let store = Arc::new(MemoryEventStore::new());
        (
            SubscriptionRegistry::new(workers.clone(), store.clone()),
            workers,
            store,
        )
    }

    #[tokio::test]
    async fn first_subscribe_starts_worker_once() {
        let (reg, workers, _) = registry();
        let out = reg.subscribe(&id("db1", 1)).await.unwrap();
        assert_eq!(
            out,
            SubscribeOutcome {
                newly_registered: true,
                worker_started: true
            }
        );
        let again = reg.subscribe(&id("db1", 1)).await.unwrap();
        assert!(!again.newly_registered);
        assert!(!again.worker_started);
        assert_eq!(workers.counts(&dest("db1")).starts, 1);
    }

    #[tokio::test]
    async fn sole_subscriber_unsubscribe_stops_worker() {
        let (reg, workers, _) = registry();
        let c = id("db1", 1);
        let _ = reg.subscribe(&c).await.unwrap();
        let out = reg.unsubscribe(&c).await.unwrap();
        assert_eq!(
            out,
            UnsubscribeOutcome {
                removed: true,
                worker_stopped: true
            }
        );
        assert_eq!(workers.counts(&dest("db1")), WorkerCounts { starts: 1, stops: 1 });
        assert!(reg.list_subscribers(&dest("db1")).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_with_others_remaining_keeps_worker() {
        let (reg, workers, _) = registry();
        let _ = reg.subscribe(&id("db1", 1)).await.unwrap();
        let _ = reg.subscribe(&id("db1", 2)).await.unwrap();
        let out = reg.unsubscribe(&id("db1", 1)).await.unwrap();
        assert!(out.removed);
        assert!(!out.worker_stopped);
        assert_eq!(workers.counts(&dest("db1")).stops, 0);
    }

    #[tokio::test]
    async fn unsubscribe_of_unregistered_identity_never_stops() {
        let (reg, workers, _) = registry();
        let _ = reg.subscribe(&id("db1", 1)).await.unwrap();
        let out = reg.unsubscribe(&id("db1", 9)).await.unwrap();
        assert!(!out.removed);
        assert!(!out.worker_stopped);
        assert_eq!(workers.counts(&dest("db1")).stops, 0);
    }

    #[tokio::test]
    async fn release_stops_but_keeps_registration() {
        let (reg, workers, _) = registry();
        let c = id("db1", 1);
        let _ = reg.subscribe(&c).await.unwrap();
        assert!(reg.release(&c).await.unwrap());
        assert!(reg.is_registered(&c).await);
        assert_eq!(workers.counts(&dest("db1")).stops, 1);

        // A later subscribe restarts the worker.
        let out = reg.subscribe(&c).await.unwrap();
        assert!(out.worker_started);
    }

    #[tokio::test]
    async fn filter_is_installed_and_last_one_wins() {
        let (reg, _, store) = registry();
        let a = ClientIdentity::new(dest("db1"), ClientId::new(1), Some(r"a\..*".into()));
        let b = ClientIdentity::new(dest("db1"), ClientId::new(2), Some(r"b\..*".into()));
        let _ = reg.subscribe(&a).await.unwrap();
        let _ = reg.subscribe(&b).await.unwrap();
        assert_eq!(store.filter_expression(&dest("db1")).as_deref(), Some(r"b\..*"));
    }

    #[tokio::test]
    async fn invalid_filter_withdraws_registration() {
        let (reg, workers, _) = registry();
        let bad = ClientIdentity::new(dest("db1"), ClientId::new(1), Some("(".into()));
        let err = reg.subscribe(&bad).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidFilter { .. }));
        assert!(!reg.is_registered(&bad).await);
        assert_eq!(workers.counts(&dest("db1")).starts, 0);
    }

    #[tokio::test]
    async fn failed_resubscribe_keeps_previous_registration() {
        let (reg, _, _) = registry();
        let good = ClientIdentity::new(dest("db1"), ClientId::new(1), Some(r"a\..*".into()));
        let bad = ClientIdentity::new(dest("db1"), ClientId::new(1), Some("(".into()));
        let _ = reg.subscribe(&good).await.unwrap();
        assert!(reg.subscribe(&bad).await.is_err());
        let subs = reg.list_subscribers(&dest("db1")).await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].filter(), Some(r"a\..*"));
    }

    struct FailingStart;

    #[async_trait]
    impl WorkerLifecycle for FailingStart {
        async fn is_running(&self, _: &Destination) -> bool {
            false
        }
        async fn start(&self, destination: &Destination) -> CollaboratorResult<()> {
            Err(CollaboratorError::Worker {
                destination: destination.to_string(),
                message: "no capacity".into(),
            })
        }
        async fn stop(&self, _: &Destination) -> CollaboratorResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_start_withdraws_registration() {
        let reg = SubscriptionRegistry::new(Arc::new(FailingStart), Arc::new(MemoryEventStore::new()));
        let c = id("db1", 1);
        assert!(matches!(
            reg.subscribe(&c).await,
            Err(CollaboratorError::Worker { .. })
        ));
        assert!(!reg.is_registered(&c).await);
    }

    struct PanickingFilter;

    #[async_trait]
    impl FilterInstaller for PanickingFilter {
        async fn set_filter(&self, _: &Destination, _: &str) -> CollaboratorResult<()> {
            panic!("filter backend crashed");
        }
    }

    #[tokio::test]
    async fn panicking_filter_leaves_no_registration() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let workers = Arc::new(LocalWorkerController::new());
        let reg = SubscriptionRegistry::new(workers.clone(), Arc::new(PanickingFilter));
        let sole = id("db1", 1);
        let _ = reg.subscribe(&sole).await.unwrap();

        let filtered = ClientIdentity::new(dest("db1"), ClientId::new(2), Some(r"shop\..*".into()));
        let outcome = AssertUnwindSafe(reg.subscribe(&filtered)).catch_unwind().await;
        assert!(outcome.is_err());
        assert!(!reg.is_registered(&filtered).await);
        assert_eq!(reg.list_subscribers(&dest("db1")).await.len(), 1);

        // The remaining subscriber is still the last one out.
        let out = reg.unsubscribe(&sole).await.unwrap();
        assert!(out.worker_stopped);
        assert_eq!(workers.counts(&dest("db1")).stops, 1);
    }

    /// Holds `stop("db1")` until released; everything else passes through.
    struct BlockingStop {
        inner: LocalWorkerController,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl WorkerLifecycle for BlockingStop {
        async fn is_running(&self, destination: &Destination) -> bool {
            self.inner.is_running(destination).await
        }
        async fn start(&self, destination: &Destination) -> CollaboratorResult<()> {
            self.inner.start(destination).await
        }
        async fn stop(&self, destination: &Destination) -> CollaboratorResult<()> {
            if destination.as_str() == "db1" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.stop(destination).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_stop_does_not_hold_up_other_destinations() {
        let workers = Arc::new(BlockingStop {
            inner: LocalWorkerController::new(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let reg = Arc::new(SubscriptionRegistry::new(
            workers.clone(),
            Arc::new(MemoryEventStore::new()),
        ));
        let a = id("db1", 1);
        let _ = reg.subscribe(&a).await.unwrap();

        let r = reg.clone();
        let stopping = tokio::spawn(async move { r.unsubscribe(&a).await });
        workers.entered.notified().await;

        let other = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            reg.subscribe(&id("db2", 1)),
        )
        .await
        .expect("db2 subscribe waited on the db1 stop")
        .unwrap();
        assert!(other.worker_started);
        assert_eq!(reg.list_subscribers(&dest("db2")).await.len(), 1);
        assert!(!stopping.is_finished());

        workers.release.notify_one();
        let out = stopping.await.unwrap().unwrap();
        assert!(out.worker_stopped);
        assert_eq!(workers.inner.running(), vec![dest("db2")]);
    }

    /// Records the order of worker calls and yields inside each so that
    /// concurrent callers interleave if they are not serialized.
    #[derive(Default)]
    struct Recording {
        running: SyncMutex<bool>,
        calls: SyncMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl WorkerLifecycle for Recording {
        async fn is_running(&self, _: &Destination) -> bool {
            *self.running.lock()
        }
        async fn start(&self, _: &Destination) -> CollaboratorResult<()> {
            self.calls.lock().push("start");
            tokio::task::yield_now().await;
            *self.running.lock() = true;
            Ok(())
        }
        async fn stop(&self, _: &Destination) -> CollaboratorResult<()> {
            self.calls.lock().push("stop");
            tokio::task::yield_now().await;
            *self.running.lock() = false;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_unsubscribe_leave_no_orphan() {
        for _ in 0..50 {
            let workers = Arc::new(Recording::default());
            let reg = Arc::new(SubscriptionRegistry::new(
                workers.clone(),
                Arc::new(MemoryEventStore::new()),
            ));
            let a = id("db1", 1);
            let b = id("db1", 2);
            let _ = reg.subscribe(&a).await.unwrap();

            let r1 = reg.clone();
            let r2 = reg.clone();
            let leave = tokio::spawn(async move { r1.unsubscribe(&a).await });
            let join = tokio::spawn(async move { r2.subscribe(&b).await });
            let _ = leave.await.unwrap().unwrap();
            let _ = join.await.unwrap().unwrap();

            // B is registered, so its worker must be running.
            assert_eq!(reg.list_subscribers(&dest("db1")).await.len(), 1);
            assert!(workers.is_running(&dest("db1")).await);
            assert_eq!(workers.calls.lock().last(), Some(&"start"));
        }
    }

    #[tokio::test]
    async fn snapshot_reports_each_destination() {
        let (reg, _, _) = registry();
        let _ = reg.subscribe(&id("b", 1)).await.unwrap();
        let _ = reg.subscribe(&id("a", 1)).await.unwrap();
        let _ = reg.subscribe(&id("a", 2)).await.unwrap();
        let _ = reg.unsubscribe(&id("b", 1)).await.unwrap();

        let snap = reg.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].destination.as_str(), "a");
        assert_eq!(snap[0].subscribers, 2);
        assert!(snap[0].running);
        assert_eq!(snap[1].subscribers, 0);
        assert!(!snap[1].running);
    }

    #[tokio::test]
    async fn list_subscribers_sorted_by_client_id() {
        let (reg, _, _) = registry();
        for client in [3, 1, 2] {
            let _ = reg.subscribe(&id("db1", client)).await.unwrap();
        }
        let ids: Vec<i16> = reg
            .list_subscribers(&dest("db1"))
            .await
            .iter()
            .map(|c| c.client_id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(reg.list_subscribers(&dest("none")).await.is_empty());
    }
}
