//! Error types shared across crates.

use thiserror::Error;

use crate::batch::BatchId;

/// A request named no usable subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Destination or client id was empty.
    #[error("destination or clientId is null")]
    Missing,
    /// Client id is not a 16-bit integer.
    #[error("clientId '{value}' is not a valid integer")]
    InvalidClientId {
        /// The rejected raw value.
        value: String,
    },
}

/// Failure reported by a delivery, filter, or worker backend.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The batch id is not in flight for this subscriber.
    #[error("batch {batch_id} is not in flight for {subscriber}")]
    UnknownBatch {
        /// Subscriber display name.
        subscriber: String,
        /// The batch that was named.
        batch_id: BatchId,
    },

    /// Acks must be issued in delivery order.
    #[error("batch {batch_id} is not the oldest in-flight batch for {subscriber} (expected {expected})")]
    OutOfOrderAck {
        /// Subscriber display name.
        subscriber: String,
        /// The batch that was named.
        batch_id: BatchId,
        /// The oldest in-flight batch.
        expected: BatchId,
    },

    /// The filter expression could not be compiled.
    #[error("invalid filter '{expression}': {message}")]
    InvalidFilter {
        /// The rejected expression.
        expression: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// The capture worker could not be started or stopped.
    #[error("capture worker for '{destination}' failed: {message}")]
    Worker {
        /// Destination whose worker failed.
        destination: String,
        /// Description.
        message: String,
    },

    /// The backend is not reachable.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description.
        message: String,
    },
}
