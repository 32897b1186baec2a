//! Consumer connection lifecycle: handles one socket from accept through
//! close.

use std::time::Instant;

use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use sluice_protocol::frame::frame_codec;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::SessionContext;
use super::attachment::SessionState;
use super::handler::{detach, handle_packet, release_detached};
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
};

/// Run a session for one connected consumer.
///
/// 1. Reads length-prefixed frames and handles each payload in order
/// 2. Writes each response before reading the next frame
/// 3. Stops on peer close, transport error, or `cancel`
/// 4. Releases the bound subscriber exactly once, even if the task is aborted
#[instrument(name = "connection", skip_all, fields(connection = %connection))]
pub async fn run_connection<S>(
    stream: S,
    connection: String,
    ctx: SessionContext,
    max_frame_length: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, frame_codec(max_frame_length));
    let mut guard = ConnectionGuard::open(ctx);

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                info!("server shutting down, closing connection");
                break;
            }
            frame = framed.next() => frame,
        };

        let payload = match frame {
            Some(Ok(payload)) => payload,
            Some(Err(err)) => {
                warn!(error = %err, "transport error, closing connection");
                break;
            }
            None => {
                debug!("peer closed connection");
                break;
            }
        };

        let result = handle_packet(&payload, &connection, &mut guard.state, &guard.ctx).await;
        if let Some(response) = result.response {
            if let Err(err) = framed.send(response).await {
                warn!(error = %err, packet_type = result.packet_type, "failed to send response, closing connection");
                break;
            }
        }
    }

    if let Some(release) = guard.release() {
        let _ = release.await;
    }
}

/// Owns the per-connection state so close cleanup runs on every exit path.
///
/// The release itself runs on its own task, so aborting the connection task
/// part-way through a close cannot skip the stop policy.
struct ConnectionGuard {
    state: SessionState,
    ctx: SessionContext,
    started: Instant,
}

impl ConnectionGuard {
    fn open(ctx: SessionContext) -> Self {
        info!("consumer connected");
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        ctx.stats.connection_opened();
        Self {
            state: SessionState::new(),
            ctx,
            started: Instant::now(),
        }
    }

    /// Detach the bound subscriber and release it on a separate task.
    fn release(&mut self) -> Option<JoinHandle<()>> {
        let identity = detach(&mut self.state, &self.ctx)?;
        let ctx = self.ctx.clone();
        let task = async move { release_detached(&identity, &ctx).await }.instrument(Span::current());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(task)),
            Err(_) => {
                warn!("no runtime available, bound subscriber not released");
                None
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.release().is_some() {
            debug!("connection task ended before close, subscriber released in background");
        }
        info!("consumer disconnected");
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(CONNECTION_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());
        self.ctx.stats.connection_closed();
    }
}
