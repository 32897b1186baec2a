//! In-memory pending-batch store.
//!
//! Each destination keeps a record log. Each client of a destination keeps an
//! ack cursor (records before it are committed) and an ordered queue of
//! in-flight batches, each covering a contiguous range of the log directly
//! after the previous one.
//!
//! Once every known client has acknowledged a prefix of the log, that prefix
//! is dropped and all cursors are rebased. A client first seen after that
//! starts at the oldest retained record.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sluice_core::{
    Batch, BatchId, ClientId, ClientIdentity, CollaboratorError, CollaboratorResult, Destination,
    EventDelivery, FilterInstaller,
};
use tracing::{debug, info};

use crate::filter::TableFilter;

/// One captured change record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// `schema.table` the change belongs to.
    pub table: String,
    /// Opaque encoded event.
    pub payload: Bytes,
}

impl Record {
    /// Build a record.
    pub fn new(table: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            table: table.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    id: BatchId,
    end: usize,
}

#[derive(Debug, Default)]
struct ClientCursor {
    acked: usize,
    in_flight: VecDeque<InFlight>,
}

impl ClientCursor {
    fn next_unsent(&self) -> usize {
        self.in_flight.back().map_or(self.acked, |b| b.end)
    }
}

#[derive(Debug, Default)]
struct DestinationLog {
    records: VecDeque<Record>,
    filter: Option<TableFilter>,
    clients: HashMap<ClientId, ClientCursor>,
}

impl DestinationLog {
    /// Drop records every client has acknowledged. Returns how many.
    fn compact(&mut self) -> usize {
        let Some(floor) = self.clients.values().map(|c| c.acked).min() else {
            return 0;
        };
        if floor == 0 {
            return 0;
        }
        let _ = self.records.drain(..floor);
        for cursor in self.clients.values_mut() {
            cursor.acked -= floor;
            for batch in &mut cursor.in_flight {
                batch.end -= floor;
            }
        }
        floor
    }
}

/// Pending change records and per-client batch bookkeeping.
pub struct MemoryEventStore {
    logs: DashMap<Destination, DestinationLog>,
    next_batch_id: AtomicI64,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
            next_batch_id: AtomicI64::new(1),
        }
    }

    /// Append records to a destination's log.
    ///
    /// Records rejected by the destination's filter are dropped. Returns the
    /// number of records kept.
    pub fn publish(&self, destination: &Destination, records: impl IntoIterator<Item = Record>) -> usize {
        let mut log = self.logs.entry(destination.clone()).or_default();
        let before = log.records.len();
        let filter = log.filter.clone();
        log.records.extend(
            records
                .into_iter()
                .filter(|r| filter.as_ref().is_none_or(|f| f.matches(&r.table))),
        );
        let kept = log.records.len() - before;
        debug!(%destination, kept, "records published");
        kept
    }

    /// Records not yet acknowledged by `identity`.
    pub fn unacked_count(&self, identity: &ClientIdentity) -> usize {
        self.logs.get(identity.destination()).map_or(0, |log| {
            let acked = log.clients.get(&identity.client_id()).map_or(0, |c| c.acked);
            log.records.len().saturating_sub(acked)
        })
    }

    /// Ids of the batches currently in flight for `identity`, oldest first.
    pub fn in_flight(&self, identity: &ClientIdentity) -> Vec<BatchId> {
        self.logs
            .get(identity.destination())
            .and_then(|log| {
                log.clients
                    .get(&identity.client_id())
                    .map(|c| c.in_flight.iter().map(|b| b.id).collect())
            })
            .unwrap_or_default()
    }

    /// Records still held for a destination.
    pub fn retained_count(&self, destination: &Destination) -> usize {
        self.logs.get(destination).map_or(0, |log| log.records.len())
    }

    /// The filter expression installed for a destination.
    pub fn filter_expression(&self, destination: &Destination) -> Option<String> {
        self.logs
            .get(destination)
            .and_then(|log| log.filter.as_ref().map(|f| f.expression().to_owned()))
    }

    fn unknown_batch(identity: &ClientIdentity, batch_id: BatchId) -> CollaboratorError {
        CollaboratorError::UnknownBatch {
            subscriber: identity.to_string(),
            batch_id,
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventDelivery for MemoryEventStore {
    async fn pull_pending(&self, identity: &ClientIdentity, max_count: usize) -> CollaboratorResult<Batch> {
        let Some(mut log) = self.logs.get_mut(identity.destination()) else {
            return Ok(Batch::empty());
        };
        let log = &mut *log;
        let cursor = log.clients.entry(identity.client_id()).or_default();

        let start = cursor.next_unsent();
        let end = start.saturating_add(max_count).min(log.records.len());
        if start >= end {
            return Ok(Batch::empty());
        }

        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        cursor.in_flight.push_back(InFlight { id, end });
        let entries = log.records.range(start..end).map(|r| r.payload.clone()).collect();
        debug!(subscriber = %identity, batch_id = id, count = end - start, "batch delivered");
        Ok(Batch::new(id, entries))
    }

    async fn acknowledge(&self, identity: &ClientIdentity, batch_id: BatchId) -> CollaboratorResult<()> {
        let mut log = self
            .logs
            .get_mut(identity.destination())
            .ok_or_else(|| Self::unknown_batch(identity, batch_id))?;
        let cursor = log
            .clients
            .get_mut(&identity.client_id())
            .ok_or_else(|| Self::unknown_batch(identity, batch_id))?;

        match cursor.in_flight.front().copied() {
            Some(oldest) if oldest.id == batch_id => {
                cursor.acked = oldest.end;
                let _ = cursor.in_flight.pop_front();
                debug!(subscriber = %identity, batch_id, "batch acknowledged");
            }
            Some(oldest) if cursor.in_flight.iter().any(|b| b.id == batch_id) => {
                return Err(CollaboratorError::OutOfOrderAck {
                    subscriber: identity.to_string(),
                    batch_id,
                    expected: oldest.id,
                });
            }
            _ => return Err(Self::unknown_batch(identity, batch_id)),
        }

        let trimmed = log.compact();
        if trimmed > 0 {
            debug!(destination = %identity.destination(), trimmed, "acknowledged records compacted");
        }
        Ok(())
    }

    async fn rollback_all(&self, identity: &ClientIdentity) -> CollaboratorResult<()> {
        if let Some(mut log) = self.logs.get_mut(identity.destination()) {
            if let Some(cursor) = log.clients.get_mut(&identity.client_id()) {
                let dropped = cursor.in_flight.len();
                cursor.in_flight.clear();
                debug!(subscriber = %identity, dropped, "all in-flight batches rolled back");
            }
        }
        Ok(())
    }

    async fn rollback_one(&self, identity: &ClientIdentity, batch_id: BatchId) -> CollaboratorResult<()> {
        let mut log = self
            .logs
            .get_mut(identity.destination())
            .ok_or_else(|| Self::unknown_batch(identity, batch_id))?;
        let cursor = log
            .clients
            .get_mut(&identity.client_id())
            .ok_or_else(|| Self::unknown_batch(identity, batch_id))?;

        let position = cursor
            .in_flight
            .iter()
            .position(|b| b.id == batch_id)
            .ok_or_else(|| Self::unknown_batch(identity, batch_id))?;
        let dropped = cursor.in_flight.len() - position;
        cursor.in_flight.truncate(position);
        debug!(subscriber = %identity, batch_id, dropped, "batch rolled back");
        Ok(())
    }
}

#[async_trait]
impl FilterInstaller for MemoryEventStore {
    async fn set_filter(&self, destination: &Destination, expression: &str) -> CollaboratorResult<()> {
        let filter = TableFilter::parse(expression)?;
        self.logs.entry(destination.clone()).or_default().filter = Some(filter);
        info!(%destination, filter = expression, "filter installed");
        Ok(())
    }
}
