//! Per-connection WebSocket message loop.
//!
//! # Responsibilities
//! - Read frames one at a time and hand them to the protocol adapter
//! - Write each reply before reading the next frame
//! - Release connection-scoped state on close or shutdown
//!
//! Messages on one connection are processed strictly in order, so replies
//! leave in the same order their requests arrived.

use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::net::ConnectionGuard;
use crate::protocol::{invalid_protocol_frame, ConnectionContext, ProtocolAdapter, ProtocolError, Reply};
use crate::session::ClientInfo;

/// Drive one upgraded socket until the peer leaves or shutdown fires.
pub async fn serve_connection(
    mut socket: WebSocket,
    adapter: Arc<ProtocolAdapter>,
    guard: ConnectionGuard,
    client: ClientInfo,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut conn = ConnectionContext::new(guard.id().as_u64().to_string(), client);
    tracing::info!(
        connection_id = %guard.id(),
        peer = conn.client.ip_address.as_deref().unwrap_or("-"),
        "WebSocket connected"
    );

    loop {
        let message = tokio::select! {
            message = socket.recv() => message,
            _ = shutdown_rx.recv() => {
                tracing::debug!(connection_id = %guard.id(), "Closing connection for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        };

        let reply = match message {
            Some(Ok(Message::Text(text))) => adapter.handle_text(&mut conn, text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => adapter.handle_text(&mut conn, text).await,
                Err(_) => {
                    let err = ProtocolError::InvalidProtocol("binary frame is not valid UTF-8".into());
                    Reply::failed(invalid_protocol_frame(&err), err)
                }
            },
            // Pings are answered by axum
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %guard.id(), error = %e, "WebSocket read failed");
                break;
            }
        };

        if let Some(frame) = reply.frame {
            if let Err(e) = socket.send(Message::Text(frame.to_string().into())).await {
                tracing::debug!(connection_id = %guard.id(), error = %e, "WebSocket write failed");
                break;
            }
        }
    }

    adapter.on_disconnect(&conn).await;
    tracing::info!(connection_id = %guard.id(), "WebSocket disconnected");
    drop(guard);
}
