//! Local capture-worker controller.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_core::{CollaboratorResult, Destination, WorkerLifecycle};
use tracing::info;

/// How often a destination's worker was started and stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerCounts {
    /// Transitions from stopped to running.
    pub starts: usize,
    /// Transitions from running to stopped.
    pub stops: usize,
}

#[derive(Default)]
struct Inner {
    running: HashSet<Destination>,
    counts: HashMap<Destination, WorkerCounts>,
}

/// Tracks running capture workers in process.
///
/// Start and stop are idempotent; only real transitions are counted.
#[derive(Default)]
pub struct LocalWorkerController {
    inner: Mutex<Inner>,
}

impl LocalWorkerController {
    /// Create a controller with no running workers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start/stop transition counts for a destination.
    pub fn counts(&self, destination: &Destination) -> WorkerCounts {
        self.inner.lock().counts.get(destination).copied().unwrap_or_default()
    }

    /// Destinations with a running worker, sorted.
    pub fn running(&self) -> Vec<Destination> {
        let mut running: Vec<_> = self.inner.lock().running.iter().cloned().collect();
        running.sort();
        running
    }
}

#[async_trait]
impl WorkerLifecycle for LocalWorkerController {
    async fn is_running(&self, destination: &Destination) -> bool {
        self.inner.lock().running.contains(destination)
    }

    async fn start(&self, destination: &Destination) -> CollaboratorResult<()> {
        let mut inner = self.inner.lock();
        if inner.running.insert(destination.clone()) {
            inner.counts.entry(destination.clone()).or_default().starts += 1;
            info!(%destination, "capture worker started");
        }
        Ok(())
    }

    async fn stop(&self, destination: &Destination) -> CollaboratorResult<()> {
        let mut inner = self.inner.lock();
        if inner.running.remove(destination) {
            inner.counts.entry(destination.clone()).or_default().stops += 1;
            info!(%destination, "capture worker stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::logging::capture_logs;

    fn dest(name: &str) -> Destination {
        Destination::new(name).unwrap()
    }

    #[tokio::test]
    async fn start_then_stop() {
        let ctl = LocalWorkerController::new();
        let d = dest("db1");
        assert!(!ctl.is_running(&d).await);
        ctl.start(&d).await.unwrap();
        assert!(ctl.is_running(&d).await);
        ctl.stop(&d).await.unwrap();
        assert!(!ctl.is_running(&d).await);
        assert_eq!(ctl.counts(&d), WorkerCounts { starts: 1, stops: 1 });
    }

    #[tokio::test]
    async fn repeated_start_counts_once() {
        let ctl = LocalWorkerController::new();
        let d = dest("db1");
        ctl.start(&d).await.unwrap();
        ctl.start(&d).await.unwrap();
        assert_eq!(ctl.counts(&d).starts, 1);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let ctl = LocalWorkerController::new();
        let d = dest("db1");
        ctl.stop(&d).await.unwrap();
        assert_eq!(ctl.counts(&d), WorkerCounts::default());
    }

    #[tokio::test]
    async fn destinations_are_independent() {
        let ctl = LocalWorkerController::new();
        ctl.start(&dest("b")).await.unwrap();
        ctl.start(&dest("a")).await.unwrap();
        ctl.stop(&dest("b")).await.unwrap();
        assert_eq!(ctl.running(), vec![dest("a")]);
    }

    #[tokio::test]
    async fn transitions_are_logged() {
        let (logs, _guard) = capture_logs();
        let ctl = LocalWorkerController::new();
        let d = dest("db1");
        ctl.start(&d).await.unwrap();
        ctl.start(&d).await.unwrap();
        ctl.stop(&d).await.unwrap();
        assert_eq!(logs.matching("capture worker started").len(), 1);
        let stopped = logs.matching("capture worker stopped");
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].field("destination"), Some("db1"));
    }
}
