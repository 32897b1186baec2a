//! Consumer sessions: per-connection state, packet dispatch and the
//! connection task that ties them to a socket.

pub mod attachment;
pub mod connection;
pub mod handler;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sluice_core::EventDelivery;

use crate::registry::SubscriptionRegistry;

pub use attachment::{Attachment, SessionState};
pub use handler::{HandleResult, handle_packet};

/// Shared dependencies every session handler uses.
#[derive(Clone)]
pub struct SessionContext {
    /// Registered subscribers and the worker policy.
    pub registry: Arc<SubscriptionRegistry>,
    /// Pending-batch backend.
    pub delivery: Arc<dyn EventDelivery>,
    /// Records per GET when the request asks for zero or fewer.
    pub default_fetch_size: usize,
    /// Live connection counters.
    pub stats: Arc<SessionStats>,
}

/// Live connection and binding counts.
#[derive(Debug, Default)]
pub struct SessionStats {
    connections: AtomicUsize,
    bound: AtomicUsize,
}

impl SessionStats {
    /// Open connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Connections currently bound to a subscriber.
    pub fn bound(&self) -> usize {
        self.bound.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) {
        let _ = self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        let _ = self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn bound_added(&self) {
        let _ = self.bound.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bound_removed(&self) {
        let _ = self.bound.fetch_sub(1, Ordering::Relaxed);
    }
}
