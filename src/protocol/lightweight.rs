//! Op-based lightweight protocol.
//!
//! ```text
//! {"op":"hello","session_id","token"}            → {"op":"hello_ack","ok",...}
//! {"op":"list_tools"}                            → {"op":"tools_list","tools"}
//! {"op":"call_tool","request_id","name","arguments"} → {"op":"call_tool_res",...}
//! {"op":"ping","timestamp"}                      → {"op":"pong","timestamp"}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{encode, ErrorBody, ProtocolAdapter, ProtocolError, ProtocolMessage, Reply, ServerInfo};
use super::adapter::ConnectionContext;
use crate::gateway::{RequestContext, ToolCall, ToolDescriptor, ToolOutput};
use crate::persistence::unix_time;
use crate::providers::Provider;

pub const PROTOCOL_VERSION: &str = "1.0";
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

#[derive(Debug, Deserialize)]
struct Hello {
    session_id: Option<String>,
    token: Option<String>,
    protocol_version: Option<String>,
    user_id: Option<String>,
    user_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallTool {
    name: String,
    #[serde(default)]
    arguments: Value,
    provider: Option<Provider>,
}

#[derive(Debug, Deserialize)]
struct Ping {
    timestamp: Option<Value>,
}

/// Server → client frames.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpResponse {
    HelloAck {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol_version: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_info: Option<ServerInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    ToolsList {
        tools: Vec<ToolDescriptor>,
    },
    CallToolRes {
        request_id: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outputs: Option<Vec<ToolOutput>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Pong {
        timestamp: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
        error: ErrorBody,
    },
}

pub(crate) async fn handle(adapter: &ProtocolAdapter, conn: &mut ConnectionContext, msg: &ProtocolMessage) -> Reply {
    match msg.operation.as_str() {
        "hello" => hello(adapter, conn, msg).await,
        "list_tools" => list_tools(adapter, conn, msg),
        "call_tool" => call_tool(adapter, conn, msg).await,
        "ping" => ping(msg),
        other => error_reply(msg.request_id.clone(), ProtocolError::UnknownOperation(other.to_string())),
    }
}

fn parse<T: DeserializeOwned>(msg: &ProtocolMessage) -> Result<T, ProtocolError> {
    serde_json::from_value(msg.data.clone()).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

fn error_reply(request_id: Option<Value>, err: ProtocolError) -> Reply {
    let frame = encode(&OpResponse::Error {
        request_id,
        error: err.body(),
    });
    Reply::failed(frame, err)
}

fn hello_failed(err: ProtocolError) -> Reply {
    let frame = encode(&OpResponse::HelloAck {
        ok: false,
        session_id: None,
        protocol_version: None,
        server_info: None,
        error: Some(err.body()),
    });
    Reply::failed(frame, err)
}

fn call_failed(request_id: Option<Value>, err: ProtocolError) -> Reply {
    let frame = encode(&OpResponse::CallToolRes {
        request_id,
        outputs: None,
        error: Some(err.body()),
    });
    Reply::failed(frame, err)
}

fn token_accepted(adapter: &ProtocolAdapter, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let allowed = &adapter.auth().tokens;
    allowed.is_empty() || allowed.iter().any(|t| t == token)
}

async fn hello(adapter: &ProtocolAdapter, conn: &mut ConnectionContext, msg: &ProtocolMessage) -> Reply {
    let hello: Hello = match parse(msg) {
        Ok(hello) => hello,
        Err(err) => return hello_failed(err),
    };

    if !token_accepted(adapter, hello.token.as_deref().unwrap_or("")) {
        tracing::warn!(connection_id = %conn.connection_id, "Hello rejected: missing or unknown token");
        return hello_failed(ProtocolError::AuthenticationRequired);
    }
    if let Some(version) = &hello.protocol_version {
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return hello_failed(ProtocolError::ProtocolVersionRequired(version.clone()));
        }
    }

    if hello.user_id.is_some() {
        conn.client.user_id = hello.user_id;
    }
    if hello.user_type.is_some() {
        conn.client.user_type = hello.user_type;
    }

    let session_id = hello
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match adapter.gateway().sessions().ensure(&session_id, &conn.client).await {
        Ok(session) => {
            session.set_metadata("protocol", json!("op"));
            conn.session_id = Some(session_id.clone());
            tracing::info!(
                connection_id = %conn.connection_id,
                session_id = %session_id,
                "Op-protocol client authenticated"
            );
            Reply::ok(encode(&OpResponse::HelloAck {
                ok: true,
                session_id: Some(session_id),
                protocol_version: Some(PROTOCOL_VERSION),
                server_info: Some(adapter.server_info().clone()),
                error: None,
            }))
        }
        Err(e) => hello_failed(e.into()),
    }
}

fn list_tools(adapter: &ProtocolAdapter, conn: &ConnectionContext, msg: &ProtocolMessage) -> Reply {
    if conn.session_id.is_none() {
        return error_reply(msg.request_id.clone(), ProtocolError::AuthenticationRequired);
    }
    Reply::ok(encode(&OpResponse::ToolsList {
        tools: adapter.gateway().list_tools(),
    }))
}

async fn call_tool(adapter: &ProtocolAdapter, conn: &ConnectionContext, msg: &ProtocolMessage) -> Reply {
    let request_id = msg.request_id.clone();
    let Some(session_id) = conn.session_id.clone() else {
        return call_failed(request_id, ProtocolError::AuthenticationRequired);
    };
    let req: CallTool = match parse(msg) {
        Ok(req) => req,
        Err(err) => return call_failed(request_id, err),
    };

    let ctx = RequestContext::new(session_id, conn.client.clone()).with_preferred_provider(req.provider);
    let call = ToolCall::new(req.name, req.arguments);
    match adapter.gateway().dispatch(&ctx, &call).await {
        Ok(outputs) => Reply::ok(encode(&OpResponse::CallToolRes {
            request_id,
            outputs: Some(outputs),
            error: None,
        })),
        Err(e) => call_failed(request_id, e.into()),
    }
}

fn ping(msg: &ProtocolMessage) -> Reply {
    let timestamp = parse::<Ping>(msg)
        .ok()
        .and_then(|p| p.timestamp)
        .unwrap_or_else(|| json!(unix_time()));
    Reply::ok(encode(&OpResponse::Pong { timestamp }))
}
