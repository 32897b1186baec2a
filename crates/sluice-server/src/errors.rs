//! Session error codes and error type.

use sluice_core::{CollaboratorError, IdentityError};
use sluice_protocol::DecodeError;

// ── Error code constants ────────────────────────────────────────────

/// Malformed packet, unsupported type, or failure while handling a packet.
pub const BAD_REQUEST: i32 = 400;
/// Destination or client id missing.
pub const MISSING_IDENTITY: i32 = 401;
/// Acknowledgement named the unassigned batch id.
pub const MISSING_BATCH_ID: i32 = 402;

/// Failure while handling one packet.
///
/// Every variant becomes an `ERROR` response; none closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Destination or client id was empty.
    #[error("destination or clientId is null")]
    MissingIdentity,

    /// Client id is not a 16-bit integer.
    #[error("clientId '{value}' is not a valid integer")]
    InvalidClientId {
        /// The rejected raw value.
        value: String,
    },

    /// `CLIENT_ACK` carried batch id 0.
    #[error("batchId should assign value")]
    MissingBatchId,

    /// The envelope type is not a request the server handles.
    #[error("packet type={packet_type} is NOT supported")]
    Unsupported {
        /// Type name, or the raw discriminant when unknown.
        packet_type: String,
    },

    /// The payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A delivery, filter or worker backend failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// A backend panicked while handling the packet.
    #[error("panic: {0}")]
    Panicked(String),
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Missing => Self::MissingIdentity,
            IdentityError::InvalidClientId { value } => Self::InvalidClientId { value },
        }
    }
}

impl SessionError {
    /// Numeric code carried in the `ERROR` response.
    pub fn code(&self) -> i32 {
        match self {
            Self::MissingIdentity => MISSING_IDENTITY,
            Self::MissingBatchId => MISSING_BATCH_ID,
            Self::InvalidClientId { .. }
            | Self::Unsupported { .. }
            | Self::Decode(_)
            | Self::Collaborator(_)
            | Self::Panicked(_) => BAD_REQUEST,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingIdentity => "missing_identity",
            Self::InvalidClientId { .. } => "invalid_client_id",
            Self::MissingBatchId => "missing_batch_id",
            Self::Unsupported { .. } => "unsupported",
            Self::Decode(_) => "decode",
            Self::Collaborator(_) => "collaborator",
            Self::Panicked(_) => "panicked",
        }
    }

    /// Whether this failure came from inside the server rather than from the
    /// request itself.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Collaborator(_) | Self::Panicked(_))
    }

    /// Message carried in the `ERROR` response.
    ///
    /// Internal failures name the connection they happened on.
    pub fn response_message(&self, connection: &str) -> String {
        if self.is_internal() {
            format!("something goes wrong with channel:{connection}, exception={self}")
        } else {
            self.to_string()
        }
    }
}
