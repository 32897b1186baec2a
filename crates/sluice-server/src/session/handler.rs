//! Packet dispatch: decode one payload, apply it to the session, and build
//! the response.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use sluice_core::{Batch, ClientIdentity};
use sluice_protocol::{
    ClientAck, ClientRollback, Get, Packet, Subscription, decode, describe_tag, encode_ack,
    encode_error, encode_messages,
};
use tracing::{Span, debug, error, info, instrument, warn};

use super::SessionContext;
use super::attachment::SessionState;
use crate::errors::SessionError;
use crate::metrics::{
    ERRORS_TOTAL, PACKET_DURATION_SECONDS, PACKETS_TOTAL, RECORDS_DELIVERED_TOTAL, SESSIONS_BOUND,
};

/// Result of handling one payload.
#[derive(Debug)]
pub struct HandleResult {
    /// Encoded response, or `None` when the packet gets no reply.
    pub response: Option<Bytes>,
    /// Envelope type name (`"UNKNOWN"` if the payload did not decode).
    pub packet_type: &'static str,
    /// Error code sent back, if the packet failed.
    pub error_code: Option<i32>,
}

/// What a successful packet sends back.
enum Reply {
    Ack,
    Messages(Batch),
    Silent,
}

/// Handle one packet payload received on `connection`.
///
/// Never fails: decode errors, validation errors, backend errors and backend
/// panics all become an `ERROR` response and leave the connection usable.
#[instrument(name = "packet", skip_all, fields(connection = %connection, packet_type, destination))]
pub async fn handle_packet(
    payload: &[u8],
    connection: &str,
    state: &mut SessionState,
    ctx: &SessionContext,
) -> HandleResult {
    let started = Instant::now();

    let (packet_type, outcome) = match decode(payload) {
        Ok(packet) => {
            let packet_type = packet.type_name();
            let span = Span::current();
            let _ = span.record("packet_type", packet_type);
            if let Some(destination) = packet.destination() {
                let _ = span.record("destination", destination);
            }
            debug!("dispatching packet");

            let outcome = match AssertUnwindSafe(dispatch(packet, state, ctx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(SessionError::Panicked(panic_message(panic.as_ref()))),
            };
            (packet_type, outcome)
        }
        Err(err) => ("UNKNOWN", Err(SessionError::Decode(err))),
    };

    counter!(PACKETS_TOTAL, "type" => packet_type).increment(1);
    histogram!(PACKET_DURATION_SECONDS, "type" => packet_type).record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(Reply::Ack) => HandleResult {
            response: Some(encode_ack()),
            packet_type,
            error_code: None,
        },
        Ok(Reply::Messages(batch)) => HandleResult {
            response: Some(encode_messages(batch.id, &batch.entries)),
            packet_type,
            error_code: None,
        },
        Ok(Reply::Silent) => HandleResult {
            response: None,
            packet_type,
            error_code: None,
        },
        Err(err) => {
            let code = err.code();
            if err.is_internal() {
                error!(code, error = %err, "packet failed");
            } else {
                warn!(code, error = %err, "packet rejected");
            }
            counter!(ERRORS_TOTAL, "code" => code.to_string(), "kind" => err.kind()).increment(1);
            HandleResult {
                response: Some(encode_error(code, &err.response_message(connection))),
                packet_type,
                error_code: Some(code),
            }
        }
    }
}

async fn dispatch(packet: Packet, state: &mut SessionState, ctx: &SessionContext) -> Result<Reply, SessionError> {
    match packet {
        Packet::Subscribe(body) => subscribe(body, state, ctx).await,
        Packet::Unsubscribe(body) => unsubscribe(body, state, ctx).await,
        Packet::Get(body) => get(body, ctx).await,
        Packet::ClientAck(body) => client_ack(body, ctx).await,
        Packet::ClientRollback(body) => client_rollback(body, ctx).await,
        Packet::Unsupported { tag } => Err(SessionError::Unsupported {
            packet_type: describe_tag(tag),
        }),
    }
}

async fn subscribe(body: Subscription, state: &mut SessionState, ctx: &SessionContext) -> Result<Reply, SessionError> {
    let identity = ClientIdentity::parse(&body.destination, &body.client_id, Some(&body.filter))?;
    let outcome = ctx.registry.subscribe(&identity).await?;

    if !state.is_bound() {
        ctx.stats.bound_added();
        gauge!(SESSIONS_BOUND).increment(1.0);
    }
    info!(
        subscriber = %identity,
        filter = identity.filter().unwrap_or(""),
        worker_started = outcome.worker_started,
        "subscribed"
    );
    let previous = state.identity().filter(|bound| **bound != identity).cloned();
    state.set(identity);

    // The connection no longer speaks for its old identity.
    if let Some(previous) = previous {
        match ctx.registry.release(&previous).await {
            Ok(stopped) => info!(subscriber = %previous, worker_stopped = stopped, "previous binding released"),
            Err(err) => warn!(subscriber = %previous, error = %err, "failed to release previous binding"),
        }
    }
    Ok(Reply::Ack)
}

async fn unsubscribe(body: Subscription, state: &mut SessionState, ctx: &SessionContext) -> Result<Reply, SessionError> {
    let identity = ClientIdentity::parse(&body.destination, &body.client_id, Some(&body.filter))?;
    let outcome = ctx.registry.unsubscribe(&identity).await?;

    if state.clear_if_destination(identity.destination()).is_some() {
        ctx.stats.bound_removed();
        gauge!(SESSIONS_BOUND).decrement(1.0);
    }
    info!(
        subscriber = %identity,
        removed = outcome.removed,
        worker_stopped = outcome.worker_stopped,
        "unsubscribed"
    );
    Ok(Reply::Ack)
}

async fn get(body: Get, ctx: &SessionContext) -> Result<Reply, SessionError> {
    let identity = ClientIdentity::parse(&body.destination, &body.client_id, None)?;
    let fetch_size = match usize::try_from(body.fetch_size) {
        Ok(n) if n > 0 => n,
        _ => ctx.default_fetch_size,
    };

    let batch = ctx.delivery.pull_pending(&identity, fetch_size).await?;
    if batch.entries.is_empty() {
        debug!(subscriber = %identity, "nothing pending");
        return Ok(Reply::Messages(Batch::empty()));
    }

    counter!(RECORDS_DELIVERED_TOTAL).increment(batch.len() as u64);
    debug!(subscriber = %identity, batch_id = batch.id, count = batch.len(), "batch sent");
    Ok(Reply::Messages(batch))
}

async fn client_ack(body: ClientAck, ctx: &SessionContext) -> Result<Reply, SessionError> {
    let identity = ClientIdentity::parse(&body.destination, &body.client_id, None)?;
    match body.batch_id {
        Batch::UNASSIGNED_ID => Err(SessionError::MissingBatchId),
        Batch::EMPTY_ID => Ok(Reply::Ack),
        batch_id => {
            ctx.delivery.acknowledge(&identity, batch_id).await?;
            debug!(subscriber = %identity, batch_id, "ack committed");
            Ok(Reply::Ack)
        }
    }
}

async fn client_rollback(body: ClientRollback, ctx: &SessionContext) -> Result<Reply, SessionError> {
    let identity = ClientIdentity::parse(&body.destination, &body.client_id, None)?;
    if body.batch_id == Batch::UNASSIGNED_ID {
        ctx.delivery.rollback_all(&identity).await?;
        debug!(subscriber = %identity, "rolled back all in-flight batches");
    } else {
        ctx.delivery.rollback_one(&identity, body.batch_id).await?;
        debug!(subscriber = %identity, batch_id = body.batch_id, "rolled back batch");
    }
    Ok(Reply::Silent)
}

/// Release the bound subscriber of a closing connection.
///
/// Runs the last-subscriber-stop policy once and discards the attachment.
/// Registrations are kept so a reconnecting consumer resumes its batches.
pub async fn close_session(state: &mut SessionState, ctx: &SessionContext) {
    if let Some(identity) = detach(state, ctx) {
        release_detached(&identity, ctx).await;
    }
}

/// Run the stop policy for an identity that was already detached.
pub(crate) async fn release_detached(identity: &ClientIdentity, ctx: &SessionContext) {
    match AssertUnwindSafe(ctx.registry.release(identity)).catch_unwind().await {
        Ok(Ok(true)) => info!(subscriber = %identity, "connection closed, capture worker stopped"),
        Ok(Ok(false)) => debug!(subscriber = %identity, "connection closed, other subscribers remain"),
        Ok(Err(err)) => warn!(subscriber = %identity, error = %err, "failed to release subscriber on close"),
        Err(panic) => warn!(
            subscriber = %identity,
            error = panic_message(panic.as_ref()),
            "worker backend panicked during close"
        ),
    }
}

/// Unbind the connection and update the bound-session counters.
pub(crate) fn detach(state: &mut SessionState, ctx: &SessionContext) -> Option<ClientIdentity> {
    let identity = state.clear()?;
    ctx.stats.bound_removed();
    gauge!(SESSIONS_BOUND).decrement(1.0);
    Some(identity)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
