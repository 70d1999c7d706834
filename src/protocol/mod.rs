//! Dual-protocol adapter.
//!
//! # Data Flow
//! ```text
//! WebSocket text frame
//!     → ProtocolMessage::parse (JSON + shape detection)
//!         "op" present          → lightweight.rs (hello / list_tools / call_tool / ping)
//!         "jsonrpc": "2.0"      → jsonrpc.rs (initialize / tools/* / ping / notifications)
//!         neither               → INVALID_PROTOCOL error frame
//!     → both map to one canonical ToolCall → gateway::Gateway::dispatch
//!     → response re-encoded in the originating envelope
//! ```
//!
//! # Design Decisions
//! - `op` wins: a message carrying `op` never reaches the JSON-RPC handler
//! - Every failure produces a frame; the connection stays open
//! - Notifications (JSON-RPC without `id`) never produce a frame

pub mod adapter;
pub mod error;
pub mod jsonrpc;
pub mod lightweight;

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

pub use adapter::{ConnectionContext, ProtocolAdapter, Reply};
pub use error::{ErrorBody, ProtocolError};

/// Name and version reported in handshakes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Which wire protocol a message uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// Op-based lightweight protocol.
    Lightweight,
    /// JSON-RPC 2.0 tool protocol.
    JsonRpc,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Lightweight => "op",
            ProtocolKind::JsonRpc => "jsonrpc",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a decoded message by shape.
pub fn detect(value: &Value) -> Result<ProtocolKind, ProtocolError> {
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::InvalidProtocol("message must be a JSON object".into()));
    };
    if object.contains_key("op") {
        return Ok(ProtocolKind::Lightweight);
    }
    match object.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => Ok(ProtocolKind::JsonRpc),
        Some(other) => Err(ProtocolError::InvalidProtocol(format!(
            "unsupported jsonrpc version '{}'",
            other
        ))),
        None => Err(ProtocolError::InvalidProtocol(
            "expected an 'op' field or \"jsonrpc\": \"2.0\"".into(),
        )),
    }
}

/// One inbound message, decoded and classified.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub protocol: ProtocolKind,
    pub raw: Value,
    /// `op` for the lightweight protocol, `method` for JSON-RPC.
    pub operation: String,
    /// `request_id` or JSON-RPC `id`. JSON-RPC notifications have none.
    pub request_id: Option<Value>,
    /// The op message itself, or JSON-RPC `params`.
    pub data: Value,
}

impl ProtocolMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidProtocol(format!("invalid JSON: {}", e)))?;
        let protocol = detect(&raw)?;

        let (op_field, id_field) = match protocol {
            ProtocolKind::Lightweight => ("op", "request_id"),
            ProtocolKind::JsonRpc => ("method", "id"),
        };
        let operation = raw
            .get(op_field)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidProtocol(format!("'{}' must be a string", op_field)))?
            .to_string();
        let request_id = raw.get(id_field).cloned();
        let data = match protocol {
            ProtocolKind::Lightweight => raw.clone(),
            ProtocolKind::JsonRpc => raw.get("params").cloned().unwrap_or(Value::Null),
        };

        Ok(Self {
            protocol,
            raw,
            operation,
            request_id,
            data,
        })
    }
}

/// Frame sent when a message matches neither protocol.
pub fn invalid_protocol_frame(err: &ProtocolError) -> Value {
    json!({ "error": err.body() })
}

/// Serialize a response, degrading to an internal error frame.
pub(crate) fn encode<T: Serialize>(message: &T) -> Value {
    serde_json::to_value(message).unwrap_or_else(|e| {
        json!({ "error": ProtocolError::Internal(e.to_string()).body() })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_wins_over_jsonrpc() {
        let value = json!({"op": "ping", "jsonrpc": "2.0", "method": "ping", "id": 1});
        assert_eq!(detect(&value).unwrap(), ProtocolKind::Lightweight);
    }

    #[test]
    fn jsonrpc_requires_exact_version() {
        assert_eq!(
            detect(&json!({"jsonrpc": "2.0", "method": "ping"})).unwrap(),
            ProtocolKind::JsonRpc
        );
        assert!(matches!(
            detect(&json!({"jsonrpc": "1.0", "method": "ping"})),
            Err(ProtocolError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn neither_shape_is_invalid_protocol() {
        assert!(matches!(detect(&json!({"hello": 1})), Err(ProtocolError::InvalidProtocol(_))));
        assert!(matches!(detect(&json!([1, 2])), Err(ProtocolError::InvalidProtocol(_))));
        assert!(matches!(
            ProtocolMessage::parse("{not json"),
            Err(ProtocolError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn parse_extracts_operation_and_id() {
        let msg = ProtocolMessage::parse(r#"{"op":"call_tool","request_id":"r1","name":"echo"}"#).unwrap();
        assert_eq!(msg.protocol, ProtocolKind::Lightweight);
        assert_eq!(msg.operation, "call_tool");
        assert_eq!(msg.request_id, Some(json!("r1")));

        let msg = ProtocolMessage::parse(r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"echo"},"id":7}"#)
            .unwrap();
        assert_eq!(msg.protocol, ProtocolKind::JsonRpc);
        assert_eq!(msg.operation, "tools/call");
        assert_eq!(msg.request_id, Some(json!(7)));
        assert_eq!(msg.data, json!({"name": "echo"}));

        let note = ProtocolMessage::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(note.request_id.is_none());
    }

    #[test]
    fn non_string_op_is_rejected() {
        assert!(matches!(
            ProtocolMessage::parse(r#"{"op": 5}"#),
            Err(ProtocolError::InvalidProtocol(_))
        ));
    }
}
