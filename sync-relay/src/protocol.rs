//! TCP ingestion listener.
//!
//! Accepts connections and runs each one as a [`Session`] in its own task.
//! A panicking session is logged and counted; it never takes down the
//! listener or other sessions.

use crate::error::{ProtocolError, Result};
use crate::server::SyncRelay;
use crate::session::{panic_message, Session};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::Instrument;

/// Accept connections on `listener` until the task is cancelled.
pub async fn serve(relay: Arc<SyncRelay>, listener: TcpListener) -> Result<()> {
    tracing::info!("Listening for sync clients on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(remote = %peer, "Failed to set TCP_NODELAY: {}", e);
        }

        tokio::spawn(handle_connection(relay.clone(), stream, peer.to_string()));
    }
}

/// Run one connection to completion and account for how it ended.
pub async fn handle_connection<S>(relay: Arc<SyncRelay>, stream: S, remote_addr: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    relay
        .metrics()
        .connections_total
        .fetch_add(1, Ordering::Relaxed);

    let status = relay.status_board().register(remote_addr.clone());
    let span = tracing::info_span!("session", id = status.id(), remote = %remote_addr);
    let session = Session::new(relay.clone(), stream, status.shared());

    let joined = tokio::spawn(session.run().instrument(span.clone())).await;

    let metrics = relay.metrics();
    metrics
        .records_read
        .fetch_add(status.items_read(), Ordering::Relaxed);

    span.in_scope(|| match joined {
        Ok(Ok(success)) => metrics.record_reply(success),
        Ok(Err(e)) => {
            metrics.record_error(&e);
            log_close(&e);
        }
        Err(e) if e.is_panic() => {
            metrics.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Session panicked: {}", panic_message(e.into_panic()));
        }
        Err(e) => tracing::warn!("Session task cancelled: {}", e),
    });
}

fn log_close(error: &ProtocolError) {
    match error {
        ProtocolError::Wire(e) if e.is_closed() => {
            tracing::debug!("Client disconnected before sending a handshake")
        }
        ProtocolError::TopicLocked { .. } => tracing::info!("Rejected: {}", error),
        e if e.is_rejection() => tracing::warn!("Rejected: {}", e),
        e => tracing::warn!("Protocol error: {}", e),
    }
}
