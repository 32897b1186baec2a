//! Typed packets carried inside the envelope.

use std::fmt;

use bytes::Bytes;

/// Envelope discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PacketType {
    /// Empty success response.
    Ack = 1,
    /// Error response.
    Error = 2,
    /// Subscribe request.
    Subscription = 3,
    /// Unsubscribe request.
    Unsubscription = 4,
    /// Pull request.
    Get = 5,
    /// Batch response.
    Messages = 6,
    /// Batch acknowledgment.
    ClientAck = 7,
    /// Batch rollback.
    ClientRollback = 8,
}

impl PacketType {
    /// Map a raw discriminant to a known type.
    pub fn from_i32(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::Ack),
            2 => Some(Self::Error),
            3 => Some(Self::Subscription),
            4 => Some(Self::Unsubscription),
            5 => Some(Self::Get),
            6 => Some(Self::Messages),
            7 => Some(Self::ClientAck),
            8 => Some(Self::ClientRollback),
            _ => None,
        }
    }

    /// Raw discriminant.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Upper-case protocol name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Error => "ERROR",
            Self::Subscription => "SUBSCRIPTION",
            Self::Unsubscription => "UNSUBSCRIPTION",
            Self::Get => "GET",
            Self::Messages => "MESSAGES",
            Self::ClientAck => "CLIENTACK",
            Self::ClientRollback => "CLIENTROLLBACK",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of `SUBSCRIPTION` and `UNSUBSCRIPTION`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscription {
    /// Destination name.
    pub destination: String,
    /// Client id as carried on the wire.
    pub client_id: String,
    /// Table filter expression; empty means none.
    pub filter: String,
}

/// Body of `GET`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Get {
    /// Destination name.
    pub destination: String,
    /// Client id as carried on the wire.
    pub client_id: String,
    /// Maximum number of records to return.
    pub fetch_size: i32,
}

/// Body of `CLIENT_ACK`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientAck {
    /// Destination name.
    pub destination: String,
    /// Client id as carried on the wire.
    pub client_id: String,
    /// Batch to acknowledge.
    pub batch_id: i64,
}

/// Body of `CLIENT_ROLLBACK`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientRollback {
    /// Destination name.
    pub destination: String,
    /// Client id as carried on the wire.
    pub client_id: String,
    /// Batch to roll back; `0` rolls back everything in flight.
    pub batch_id: i64,
}

/// A decoded request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// `SUBSCRIPTION`.
    Subscribe(Subscription),
    /// `UNSUBSCRIPTION`.
    Unsubscribe(Subscription),
    /// `GET`.
    Get(Get),
    /// `CLIENT_ACK`.
    ClientAck(ClientAck),
    /// `CLIENT_ROLLBACK`.
    ClientRollback(ClientRollback),
    /// Any discriminant the server does not accept, including response types.
    Unsupported {
        /// Raw discriminant.
        tag: i32,
    },
}

impl Packet {
    /// Envelope type name, for logging and metrics labels.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => PacketType::Subscription.name(),
            Self::Unsubscribe(_) => PacketType::Unsubscription.name(),
            Self::Get(_) => PacketType::Get.name(),
            Self::ClientAck(_) => PacketType::ClientAck.name(),
            Self::ClientRollback(_) => PacketType::ClientRollback.name(),
            Self::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    /// Destination the request addresses, when it names one.
    pub fn destination(&self) -> Option<&str> {
        let dest = match self {
            Self::Subscribe(s) | Self::Unsubscribe(s) => &s.destination,
            Self::Get(g) => &g.destination,
            Self::ClientAck(a) => &a.destination,
            Self::ClientRollback(r) => &r.destination,
            Self::Unsupported { .. } => return None,
        };
        (!dest.is_empty()).then_some(dest.as_str())
    }
}

/// Human-readable label for a raw discriminant.
pub fn describe_tag(tag: i32) -> String {
    PacketType::from_i32(tag).map_or_else(|| tag.to_string(), |t| t.name().to_owned())
}

/// A decoded response, as seen by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Success with no payload.
    Ack,
    /// Failure.
    Error {
        /// Numeric error code.
        code: i32,
        /// Description.
        message: String,
    },
    /// A batch of records.
    Messages {
        /// Batch id, `-1` when nothing was available.
        batch_id: i64,
        /// Opaque records.
        records: Vec<Bytes>,
    },
}
