//! JSON-RPC 2.0 tool protocol.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::adapter::ConnectionContext;
use super::{encode, ProtocolAdapter, ProtocolError, ProtocolMessage, Reply};
use crate::gateway::{RequestContext, ToolCall};
use crate::providers::Provider;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Tool protocol versions this server negotiates, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ProtocolError> for JsonRpcError {
    fn from(err: &ProtocolError) -> Self {
        Self {
            code: err.jsonrpc_code(),
            message: err.to_string(),
            data: Some(encode(&err.body())),
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: &ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error.into()),
            id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    protocol_version: Option<String>,
    #[serde(rename = "clientInfo")]
    client_info: Option<ClientInfoParams>,
}

#[derive(Debug, Deserialize)]
struct ClientInfoParams {
    name: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    provider: Option<Provider>,
}

pub(crate) async fn handle(adapter: &ProtocolAdapter, conn: &mut ConnectionContext, msg: &ProtocolMessage) -> Reply {
    let Some(id) = msg.request_id.clone() else {
        notification(conn, msg);
        return Reply::none();
    };
    if !(id.is_string() || id.is_number() || id.is_null()) {
        let err = ProtocolError::InvalidProtocol("id must be a string, number or null".into());
        return Reply::failed(encode(&JsonRpcResponse::failure(Value::Null, &err)), err);
    }

    let result = match msg.operation.as_str() {
        "initialize" => initialize(adapter, conn, &msg.data),
        "tools/list" => Ok(json!({ "tools": adapter.gateway().list_tools() })),
        "tools/call" => call_tool(adapter, conn, &msg.data).await,
        "ping" => Ok(json!({})),
        other => Err(ProtocolError::MethodNotFound(other.to_string())),
    };

    match result {
        Ok(value) => Reply::ok(encode(&JsonRpcResponse::success(id, value))),
        Err(err) => Reply::failed(encode(&JsonRpcResponse::failure(id, &err)), err),
    }
}

fn notification(conn: &mut ConnectionContext, msg: &ProtocolMessage) {
    match msg.operation.as_str() {
        "notifications/initialized" => {
            conn.initialized = true;
            tracing::debug!(connection_id = %conn.connection_id, "Client initialized");
        }
        other => tracing::debug!(connection_id = %conn.connection_id, method = other, "Ignoring notification"),
    }
}

fn params<T: serde::de::DeserializeOwned + Default>(data: &Value) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data.clone()).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

fn initialize(adapter: &ProtocolAdapter, conn: &mut ConnectionContext, data: &Value) -> Result<Value, ProtocolError> {
    let init: InitializeParams = params(data)?;

    let negotiated = init
        .protocol_version
        .as_deref()
        .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]);

    if let Some(client) = init.client_info {
        if conn.client.user_agent.is_none() {
            conn.client.user_agent = Some(match client.version {
                Some(version) => format!("{}/{}", client.name, version),
                None => client.name,
            });
        }
    }
    conn.initialized = true;

    tracing::info!(
        connection_id = %conn.connection_id,
        requested = init.protocol_version.as_deref().unwrap_or("-"),
        negotiated,
        "JSON-RPC client initialized"
    );

    Ok(json!({
        "protocolVersion": negotiated,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": adapter.server_info(),
    }))
}

async fn call_tool(adapter: &ProtocolAdapter, conn: &mut ConnectionContext, data: &Value) -> Result<Value, ProtocolError> {
    if data.is_null() {
        return Err(ProtocolError::InvalidParams("tools/call requires params".into()));
    }
    let params: CallToolParams =
        serde_json::from_value(data.clone()).map_err(|e| ProtocolError::InvalidParams(e.to_string()))?;

    let session_id = conn.jsonrpc_session_id();
    let ctx = RequestContext::new(session_id, conn.client.clone()).with_preferred_provider(params.provider);
    let call = ToolCall::new(params.name, params.arguments);

    let outputs = adapter.gateway().dispatch(&ctx, &call).await?;
    let content: Vec<Value> = outputs
        .iter()
        .map(|o| json!({ "type": "text", "text": o.as_text() }))
        .collect();
    Ok(json!({ "content": content, "isError": false }))
}

#[cfg(test)]
mod tests {
    use super::super::adapter::testing::{adapter, conn};
    use super::*;

    #[tokio::test]
    async fn initialize_negotiates_version() {
        let adapter = adapter();
        let mut conn = conn();
        let reply = adapter
            .handle_text(
                &mut conn,
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"cli","version":"0.1"}}}"#,
            )
            .await;
        let frame = reply.frame.unwrap();
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["result"]["protocolVersion"], "2024-11-05");
        assert!(frame["result"]["capabilities"]["tools"].is_object());
        assert!(frame["result"]["serverInfo"]["version"].is_string());
        assert!(conn.initialized);
        assert_eq!(conn.client.user_agent.as_deref(), Some("cli/0.1"));

        let reply = adapter
            .handle_text(
                &mut conn,
                r#"{"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"1999-01-01"}}"#,
            )
            .await;
        assert_eq!(
            reply.frame.unwrap()["result"]["protocolVersion"],
            SUPPORTED_PROTOCOL_VERSIONS[0]
        );
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let adapter = adapter();
        let mut conn = conn();
        let reply = adapter
            .handle_text(&mut conn, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.frame.is_none());
        assert!(reply.error.is_none());
        assert!(conn.initialized);
    }

    #[tokio::test]
    async fn tools_call_preserves_id_and_wraps_content() {
        let adapter = adapter();
        let mut conn = conn();
        let reply = adapter
            .handle_text(
                &mut conn,
                r#"{"jsonrpc":"2.0","id":"abc","method":"tools/call","params":{"name":"echo","arguments":{"x":1}}}"#,
            )
            .await;
        let frame = reply.frame.unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], "abc");
        assert_eq!(frame["result"]["content"][0]["type"], "text");
        assert_eq!(frame["result"]["content"][0]["text"], r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn errors_use_jsonrpc_codes() {
        let adapter = adapter();
        let mut conn = conn();

        let reply = adapter
            .handle_text(&mut conn, r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#)
            .await;
        assert_eq!(reply.frame.unwrap()["error"]["code"], -32601);

        let reply = adapter
            .handle_text(&mut conn, r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"arguments":{}}}"#)
            .await;
        assert_eq!(reply.frame.unwrap()["error"]["code"], -32602);

        let reply = adapter
            .handle_text(&mut conn, r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"nope"}}"#)
            .await;
        let frame = reply.frame.unwrap();
        assert_eq!(frame["error"]["code"], -32602);
        assert_eq!(frame["error"]["data"]["code"], "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn ping_and_tools_list() {
        let adapter = adapter();
        let mut conn = conn();
        let reply = adapter.handle_text(&mut conn, r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).await;
        assert_eq!(reply.frame.unwrap()["result"], json!({}));

        let reply = adapter
            .handle_text(&mut conn, r#"{"jsonrpc":"2.0","id":10,"method":"tools/list"}"#)
            .await;
        assert_eq!(reply.frame.unwrap()["result"]["tools"][0]["inputSchema"]["type"], "object");
    }
}
