//! # sluice-protocol
//!
//! Binary envelope codec for the sluice session protocol.
//!
//! Every payload is an envelope: an `i32` packet type followed by a
//! length-prefixed body whose layout depends on the type. Requests flow from
//! consumers to the server (`SUBSCRIPTION`, `UNSUBSCRIPTION`, `GET`,
//! `CLIENT_ACK`, `CLIENT_ROLLBACK`); responses flow back (`ACK`, `ERROR`,
//! `MESSAGES`).
//!
//! - [`decode`] turns one payload into a typed [`Packet`]
//! - [`encode_ack`], [`encode_error`] and [`encode_messages`] build responses
//! - [`encode_request`] and [`decode_response`] are the client half, used by
//!   tools and tests
//! - [`frame`] wraps payloads in 4-byte length-prefixed transport frames
//!
//! All integers are big-endian. Strings and byte blobs carry a `u32` length.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod packet;

pub use codec::{decode, decode_response, encode_ack, encode_error, encode_messages, encode_request};
pub use errors::DecodeError;
pub use packet::{
    ClientAck, ClientRollback, Get, Packet, PacketType, Response, Subscription, describe_tag,
};
