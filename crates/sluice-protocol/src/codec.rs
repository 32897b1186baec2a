//! Envelope encoding and decoding.
//!
//! ```text
//! envelope := type:i32  body_len:u32  body[body_len]
//! string   := len:u32  utf8[len]
//! bytes    := len:u32  octets[len]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::DecodeError;
use crate::packet::{ClientAck, ClientRollback, Get, Packet, PacketType, Response, Subscription};

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_i32())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32())
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        self.ensure(field, 8)?;
        Ok(self.buf.get_i64())
    }

    fn blob(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let declared = self.u32(field)? as usize;
        if declared > self.buf.len() {
            return Err(DecodeError::LengthOverflow {
                field,
                declared,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(declared);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.blob(field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        self.blob(field).map(Bytes::copy_from_slice)
    }

    fn finish(self, context: &'static str) -> Result<(), DecodeError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes {
                context,
                count: self.buf.len(),
            })
        }
    }
}

/// Split a payload into its type tag and body.
fn split_envelope(payload: &[u8]) -> Result<(i32, &[u8]), DecodeError> {
    let mut reader = Reader::new(payload);
    let tag = reader.i32("packet type")?;
    let body = reader.blob("body")?;
    reader.finish("envelope")?;
    Ok((tag, body))
}

// ---------------------------------------------------------------------------
// Request decoding
// ---------------------------------------------------------------------------

/// Decode one request payload.
///
/// Unknown discriminants and response types decode to
/// [`Packet::Unsupported`]; only malformed bytes are errors.
pub fn decode(payload: &[u8]) -> Result<Packet, DecodeError> {
    let (tag, body) = split_envelope(payload)?;
    let Some(packet_type) = PacketType::from_i32(tag) else {
        return Ok(Packet::Unsupported { tag });
    };
    let packet = match packet_type {
        PacketType::Subscription => Packet::Subscribe(decode_subscription(body, "SUBSCRIPTION body")?),
        PacketType::Unsubscription => {
            Packet::Unsubscribe(decode_subscription(body, "UNSUBSCRIPTION body")?)
        }
        PacketType::Get => Packet::Get(decode_get(body)?),
        PacketType::ClientAck => {
            let (destination, client_id, batch_id) = decode_batch_ref(body, "CLIENTACK body")?;
            Packet::ClientAck(ClientAck {
                destination,
                client_id,
                batch_id,
            })
        }
        PacketType::ClientRollback => {
            let (destination, client_id, batch_id) = decode_batch_ref(body, "CLIENTROLLBACK body")?;
            Packet::ClientRollback(ClientRollback {
                destination,
                client_id,
                batch_id,
            })
        }
        PacketType::Ack | PacketType::Error | PacketType::Messages => Packet::Unsupported { tag },
    };
    Ok(packet)
}

fn decode_subscription(body: &[u8], context: &'static str) -> Result<Subscription, DecodeError> {
    let mut reader = Reader::new(body);
    let destination = reader.string("destination")?;
    let client_id = reader.string("client_id")?;
    let filter = reader.string("filter")?;
    reader.finish(context)?;
    Ok(Subscription {
        destination,
        client_id,
        filter,
    })
}

fn decode_get(body: &[u8]) -> Result<Get, DecodeError> {
    let mut reader = Reader::new(body);
    let destination = reader.string("destination")?;
    let client_id = reader.string("client_id")?;
    let fetch_size = reader.i32("fetch_size")?;
    reader.finish("GET body")?;
    Ok(Get {
        destination,
        client_id,
        fetch_size,
    })
}

fn decode_batch_ref(body: &[u8], context: &'static str) -> Result<(String, String, i64), DecodeError> {
    let mut reader = Reader::new(body);
    let destination = reader.string("destination")?;
    let client_id = reader.string("client_id")?;
    let batch_id = reader.i64("batch_id")?;
    reader.finish(context)?;
    Ok((destination, client_id, batch_id))
}

// ---------------------------------------------------------------------------
// Writer helpers
// ---------------------------------------------------------------------------

#[allow(clippy::cast_possible_truncation)]
fn put_len(buf: &mut BytesMut, len: usize) {
    buf.put_u32(len as u32);
}

fn put_str(buf: &mut BytesMut, value: &str) {
    put_len(buf, value.len());
    buf.put_slice(value.as_bytes());
}

fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    put_len(buf, value.len());
    buf.put_slice(value);
}

fn envelope(packet_type: i32, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + body.len());
    buf.put_i32(packet_type);
    put_blob(&mut buf, body);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Response encoding
// ---------------------------------------------------------------------------

/// Encode the empty success response.
pub fn encode_ack() -> Bytes {
    envelope(PacketType::Ack.as_i32(), &[])
}

/// Encode an error response.
pub fn encode_error(code: i32, message: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(8 + message.len());
    body.put_i32(code);
    put_str(&mut body, message);
    envelope(PacketType::Error.as_i32(), &body)
}

/// Encode a batch response.
pub fn encode_messages(batch_id: i64, records: &[Bytes]) -> Bytes {
    let payload: usize = records.iter().map(|r| 4 + r.len()).sum();
    let mut body = BytesMut::with_capacity(12 + payload);
    body.put_i64(batch_id);
    put_len(&mut body, records.len());
    for record in records {
        put_blob(&mut body, record);
    }
    envelope(PacketType::Messages.as_i32(), &body)
}

// ---------------------------------------------------------------------------
// Client half
// ---------------------------------------------------------------------------

/// Encode a request payload.
pub fn encode_request(packet: &Packet) -> Bytes {
    let mut body = BytesMut::new();
    let tag = match packet {
        Packet::Subscribe(s) | Packet::Unsubscribe(s) => {
            put_str(&mut body, &s.destination);
            put_str(&mut body, &s.client_id);
            put_str(&mut body, &s.filter);
            if matches!(packet, Packet::Subscribe(_)) {
                PacketType::Subscription.as_i32()
            } else {
                PacketType::Unsubscription.as_i32()
            }
        }
        Packet::Get(g) => {
            put_str(&mut body, &g.destination);
            put_str(&mut body, &g.client_id);
            body.put_i32(g.fetch_size);
            PacketType::Get.as_i32()
        }
        Packet::ClientAck(a) => {
            put_str(&mut body, &a.destination);
            put_str(&mut body, &a.client_id);
            body.put_i64(a.batch_id);
            PacketType::ClientAck.as_i32()
        }
        Packet::ClientRollback(r) => {
            put_str(&mut body, &r.destination);
            put_str(&mut body, &r.client_id);
            body.put_i64(r.batch_id);
            PacketType::ClientRollback.as_i32()
        }
        Packet::Unsupported { tag } => *tag,
    };
    envelope(tag, &body)
}

/// Decode a response payload.
pub fn decode_response(payload: &[u8]) -> Result<Response, DecodeError> {
    let (tag, body) = split_envelope(payload)?;
    match PacketType::from_i32(tag) {
        Some(PacketType::Ack) => {
            Reader::new(body).finish("ACK body")?;
            Ok(Response::Ack)
        }
        Some(PacketType::Error) => {
            let mut reader = Reader::new(body);
            let code = reader.i32("code")?;
            let message = reader.string("message")?;
            reader.finish("ERROR body")?;
            Ok(Response::Error { code, message })
        }
        Some(PacketType::Messages) => {
            let mut reader = Reader::new(body);
            let batch_id = reader.i64("batch_id")?;
            let count = reader.u32("record count")? as usize;
            // each record needs at least its 4-byte length prefix
            let mut records = Vec::with_capacity(count.min(body.len() / 4));
            for _ in 0..count {
                records.push(reader.bytes("record")?);
            }
            reader.finish("MESSAGES body")?;
            Ok(Response::Messages { batch_id, records })
        }
        _ => Err(DecodeError::UnexpectedType { tag }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn sub(dest: &str, client: &str, filter: &str) -> Subscription {
        Subscription {
            destination: dest.into(),
            client_id: client.into(),
            filter: filter.into(),
        }
    }

    #[test]
    fn decode_subscribe() {
        let bytes = encode_request(&Packet::Subscribe(sub("db1", "1001", "shop\\..*")));
        assert_eq!(decode(&bytes).unwrap(), Packet::Subscribe(sub("db1", "1001", "shop\\..*")));
    }

    #[test]
    fn subscribe_and_unsubscribe_share_body_but_not_tag() {
        let s = encode_request(&Packet::Subscribe(sub("db1", "1", "")));
        let u = encode_request(&Packet::Unsubscribe(sub("db1", "1", "")));
        assert_eq!(s[4..], u[4..]);
        assert_matches!(decode(&u).unwrap(), Packet::Unsubscribe(_));
    }

    #[test]
    fn decode_get_with_negative_fetch_size() {
        let packet = Packet::Get(Get {
            destination: "db1".into(),
            client_id: "1".into(),
            fetch_size: -5,
        });
        assert_eq!(decode(&encode_request(&packet)).unwrap(), packet);
    }

    #[test]
    fn decode_ack_and_rollback_batch_ids() {
        let ack = Packet::ClientAck(ClientAck {
            destination: "db1".into(),
            client_id: "1".into(),
            batch_id: i64::MAX,
        });
        let rollback = Packet::ClientRollback(ClientRollback {
            destination: "db1".into(),
            client_id: "1".into(),
            batch_id: -1,
        });
        assert_eq!(decode(&encode_request(&ack)).unwrap(), ack);
        assert_eq!(decode(&encode_request(&rollback)).unwrap(), rollback);
    }

    #[test]
    fn unknown_tag_is_unsupported_not_error() {
        let bytes = encode_request(&Packet::Unsupported { tag: 77 });
        assert_eq!(decode(&bytes).unwrap(), Packet::Unsupported { tag: 77 });
    }

    #[test]
    fn response_types_from_client_are_unsupported() {
        assert_eq!(decode(&encode_ack()).unwrap(), Packet::Unsupported { tag: 1 });
        assert_eq!(
            decode(&encode_messages(3, &[])).unwrap(),
            Packet::Unsupported { tag: 6 }
        );
    }

    #[test]
    fn empty_payload_is_truncated() {
        assert_matches!(
            decode(&[]),
            Err(DecodeError::Truncated { field: "packet type", .. })
        );
    }

    #[test]
    fn body_length_past_end_is_overflow() {
        let mut buf = BytesMut::new();
        buf.put_i32(PacketType::Get.as_i32());
        buf.put_u32(100);
        buf.put_slice(b"abc");
        assert_matches!(
            decode(&buf),
            Err(DecodeError::LengthOverflow { field: "body", declared: 100, remaining: 3 })
        );
    }

    #[test]
    fn body_not_matching_type_fails() {
        // a SUBSCRIPTION body declared as CLIENT_ACK: the third field is a
        // 4-byte length prefix, not an 8-byte batch id
        let mut body = BytesMut::new();
        put_str(&mut body, "db1");
        put_str(&mut body, "1");
        put_str(&mut body, "");
        let bytes = envelope(PacketType::ClientAck.as_i32(), &body);
        assert_matches!(
            decode(&bytes),
            Err(DecodeError::Truncated { field: "batch_id", .. })
        );
    }

    #[test]
    fn trailing_body_bytes_rejected() {
        let mut body = BytesMut::new();
        put_str(&mut body, "db1");
        put_str(&mut body, "1");
        body.put_i64(5);
        body.put_u8(0xff);
        let bytes = envelope(PacketType::ClientAck.as_i32(), &body);
        assert_matches!(
            decode(&bytes),
            Err(DecodeError::TrailingBytes { context: "CLIENTACK body", count: 1 })
        );
    }

    #[test]
    fn trailing_envelope_bytes_rejected() {
        let mut bytes = BytesMut::from(&encode_request(&Packet::Subscribe(sub("d", "1", "")))[..]);
        bytes.put_u8(0);
        assert_matches!(
            decode(&bytes),
            Err(DecodeError::TrailingBytes { context: "envelope", count: 1 })
        );
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut body = BytesMut::new();
        put_blob(&mut body, &[0xff, 0xfe]);
        put_str(&mut body, "1");
        put_str(&mut body, "");
        let bytes = envelope(PacketType::Subscription.as_i32(), &body);
        assert_matches!(
            decode(&bytes),
            Err(DecodeError::InvalidUtf8 { field: "destination" })
        );
    }

    #[test]
    fn ack_response_layout() {
        assert_eq!(&encode_ack()[..], &[0, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(decode_response(&encode_ack()).unwrap(), Response::Ack);
    }

    #[test]
    fn error_response_decodes() {
        let bytes = encode_error(401, "destination or clientId is null");
        assert_eq!(
            decode_response(&bytes).unwrap(),
            Response::Error {
                code: 401,
                message: "destination or clientId is null".into()
            }
        );
    }

    #[test]
    fn messages_response_preserves_order() {
        let records = vec![Bytes::from_static(b"e1"), Bytes::new(), Bytes::from_static(b"e3")];
        let bytes = encode_messages(5, &records);
        assert_eq!(
            decode_response(&bytes).unwrap(),
            Response::Messages { batch_id: 5, records }
        );
    }

    #[test]
    fn empty_batch_response() {
        let bytes = encode_messages(-1, &[]);
        assert_eq!(
            decode_response(&bytes).unwrap(),
            Response::Messages { batch_id: -1, records: vec![] }
        );
    }

    #[test]
    fn messages_count_larger_than_body_fails() {
        let mut body = BytesMut::new();
        body.put_i64(1);
        body.put_u32(1_000_000);
        let bytes = envelope(PacketType::Messages.as_i32(), &body);
        assert_matches!(decode_response(&bytes), Err(DecodeError::Truncated { .. }));
    }

    #[test]
    fn request_as_response_is_unexpected() {
        let bytes = encode_request(&Packet::Get(Get::default()));
        assert_matches!(decode_response(&bytes), Err(DecodeError::UnexpectedType { tag: 5 }));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&data);
            let _ = decode_response(&data);
        }

        #[test]
        fn subscribe_fields_survive_encoding(
            dest in "\\PC{0,24}",
            client in "-?[0-9]{1,5}",
            filter in "\\PC{0,40}",
        ) {
            let packet = Packet::Subscribe(sub(&dest, &client, &filter));
            prop_assert_eq!(decode(&encode_request(&packet)).unwrap(), packet);
        }
    }
}
