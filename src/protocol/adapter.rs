//! Entry point from a transport into either protocol handler.

use serde_json::Value;
use std::sync::Arc;

use super::{invalid_protocol_frame, jsonrpc, lightweight, ProtocolError, ProtocolKind, ProtocolMessage, ServerInfo};
use crate::config::AuthConfig;
use crate::gateway::Gateway;
use crate::observability::metrics;
use crate::session::ClientInfo;

/// Per-connection protocol state.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: String,
    pub client: ClientInfo,
    /// Session bound by an op-protocol `hello`.
    pub session_id: Option<String>,
    /// Connection-scoped session used by JSON-RPC calls, created on first use.
    pub jsonrpc_session: Option<String>,
    /// Set once a JSON-RPC `initialize` succeeded.
    pub initialized: bool,
}

impl ConnectionContext {
    pub fn new(connection_id: impl Into<String>, client: ClientInfo) -> Self {
        Self {
            connection_id: connection_id.into(),
            client,
            session_id: None,
            jsonrpc_session: None,
            initialized: false,
        }
    }

    /// The JSON-RPC session id for this connection.
    pub fn jsonrpc_session_id(&mut self) -> String {
        let id = self
            .jsonrpc_session
            .get_or_insert_with(|| format!("conn-{}", self.connection_id));
        id.clone()
    }
}

/// Outcome of handling one inbound message.
///
/// `frame` is what goes back on the wire (none for notifications);
/// `error` is the failure, if any, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub frame: Option<Value>,
    pub error: Option<ProtocolError>,
}

impl Reply {
    pub fn ok(frame: Value) -> Self {
        Self {
            frame: Some(frame),
            error: None,
        }
    }

    pub fn failed(frame: Value, error: ProtocolError) -> Self {
        Self {
            frame: Some(frame),
            error: Some(error),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Detects the protocol of each message and routes it to its handler.
pub struct ProtocolAdapter {
    gateway: Arc<Gateway>,
    auth: AuthConfig,
    server_info: ServerInfo,
}

impl ProtocolAdapter {
    pub fn new(gateway: Arc<Gateway>, auth: AuthConfig) -> Self {
        Self {
            gateway,
            auth,
            server_info: ServerInfo::default(),
        }
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle one text frame.
    pub async fn handle_text(&self, conn: &mut ConnectionContext, text: &str) -> Reply {
        let message = match ProtocolMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    connection_id = %conn.connection_id,
                    error = %err,
                    "Rejected message with unknown protocol"
                );
                metrics::record_protocol_message("invalid", "error");
                return Reply::failed(invalid_protocol_frame(&err), err);
            }
        };

        let reply = match message.protocol {
            ProtocolKind::Lightweight => lightweight::handle(self, conn, &message).await,
            ProtocolKind::JsonRpc => jsonrpc::handle(self, conn, &message).await,
        };

        let outcome = if reply.error.is_some() { "error" } else { "ok" };
        metrics::record_protocol_message(message.protocol.as_str(), outcome);
        if let Some(err) = &reply.error {
            tracing::debug!(
                connection_id = %conn.connection_id,
                protocol = %message.protocol,
                operation = %message.operation,
                code = err.code(),
                "Request failed"
            );
        }
        reply
    }

    /// Release connection-scoped state when the transport closes.
    ///
    /// Op-protocol sessions outlive the connection and are left to the
    /// staleness sweep.
    pub async fn on_disconnect(&self, conn: &ConnectionContext) {
        if let Some(session_id) = &conn.jsonrpc_session {
            self.gateway.sessions().close(session_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{adapter, conn};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn invalid_protocol_gets_structured_error() {
        let adapter = adapter();
        let mut conn = conn();
        let reply = adapter.handle_text(&mut conn, r#"{"hello":"world"}"#).await;
        assert_eq!(reply.frame.unwrap()["error"]["code"], json!("INVALID_PROTOCOL"));
        assert!(matches!(reply.error, Some(ProtocolError::InvalidProtocol(_))));

        let reply = adapter.handle_text(&mut conn, "not json at all").await;
        assert_eq!(reply.error.unwrap().code(), "INVALID_PROTOCOL");
    }

    #[tokio::test]
    async fn disconnect_closes_only_the_jsonrpc_session() {
        let adapter = adapter();
        let mut conn = conn();
        adapter
            .handle_text(&mut conn, r#"{"op":"hello","session_id":"op-1","token":"t"}"#)
            .await;
        adapter
            .handle_text(
                &mut conn,
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#,
            )
            .await;
        let sessions = adapter.gateway().sessions();
        assert!(sessions.get("conn-1").await.is_some());

        adapter.on_disconnect(&conn).await;
        assert!(sessions.get("conn-1").await.is_none());
        assert!(sessions.get("op-1").await.is_some());
    }

    #[test]
    fn jsonrpc_session_is_stable_per_connection() {
        let mut conn = ConnectionContext::new("42", ClientInfo::default());
        assert_eq!(conn.jsonrpc_session_id(), "conn-42");
        assert_eq!(conn.jsonrpc_session_id(), "conn-42");
        assert_eq!(conn.jsonrpc_session.as_deref(), Some("conn-42"));
    }
}
