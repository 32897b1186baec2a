//! Collaborator traits the session layer drives.
//!
//! The session handler never touches storage, filtering or capture workers
//! directly. It reaches them through these traits, shared as `Arc<dyn …>`.

use async_trait::async_trait;

use crate::batch::{Batch, BatchId};
use crate::errors::CollaboratorError;
use crate::identity::{ClientIdentity, Destination};

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// ─────────────────────────────────────────────────────────────────────────────
// Dependency injection traits
// ─────────────────────────────────────────────────────────────────────────────

/// Pull-based access to pending change events.
#[async_trait]
pub trait EventDelivery: Send + Sync {
    /// Hand out up to `max_count` records not yet delivered to `identity`.
    ///
    /// Returns [`Batch::empty`] when nothing is pending. Never waits for new
    /// data.
    async fn pull_pending(&self, identity: &ClientIdentity, max_count: usize) -> CollaboratorResult<Batch>;

    /// Commit a delivered batch.
    async fn acknowledge(&self, identity: &ClientIdentity, batch_id: BatchId) -> CollaboratorResult<()>;

    /// Return every in-flight batch to the pending set.
    async fn rollback_all(&self, identity: &ClientIdentity) -> CollaboratorResult<()>;

    /// Return one in-flight batch (and anything delivered after it).
    async fn rollback_one(&self, identity: &ClientIdentity, batch_id: BatchId) -> CollaboratorResult<()>;
}

/// Installs the event filter used when capturing a destination.
#[async_trait]
pub trait FilterInstaller: Send + Sync {
    /// Replace the destination's filter with `expression`.
    async fn set_filter(&self, destination: &Destination, expression: &str) -> CollaboratorResult<()>;
}

/// Starts and stops the capture worker for a destination.
#[async_trait]
pub trait WorkerLifecycle: Send + Sync {
    /// Whether a worker is currently running.
    async fn is_running(&self, destination: &Destination) -> bool;

    /// Start the worker. A no-op when already running.
    async fn start(&self, destination: &Destination) -> CollaboratorResult<()>;

    /// Stop the worker. A no-op when already stopped.
    async fn stop(&self, destination: &Destination) -> CollaboratorResult<()>;
}
