//! Batches of pending change records.

use bytes::Bytes;

/// Identifier of a delivered batch.
pub type BatchId = i64;

/// A numbered group of records handed to one subscriber.
///
/// Records stay pending until the subscriber acknowledges the batch id, or
/// return to the undelivered state on rollback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Batch id, or [`Batch::EMPTY_ID`] when nothing was available.
    pub id: BatchId,
    /// Opaque records in delivery order.
    pub entries: Vec<Bytes>,
}

impl Batch {
    /// Sentinel id for "no data available". Never acked or rolled back.
    pub const EMPTY_ID: BatchId = -1;

    /// Unassigned batch id. Never a valid target for ack.
    pub const UNASSIGNED_ID: BatchId = 0;

    /// A batch carrying records.
    #[must_use]
    pub fn new(id: BatchId, entries: Vec<Bytes>) -> Self {
        Self { id, entries }
    }

    /// The "nothing to deliver" batch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: Self::EMPTY_ID,
            entries: Vec::new(),
        }
    }

    /// Whether this is the no-data sentinel.
    pub fn is_empty(&self) -> bool {
        self.id == Self::EMPTY_ID || self.entries.is_empty()
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
