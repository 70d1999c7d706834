//! Tool executor collaborator.
//!
//! The gateway never talks to a provider itself. Whatever performs the
//! call implements [`ToolExecutor`] and is injected at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{GatewayError, Result};
use crate::providers::Provider;

/// Canonical invocation produced by both wire protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Missing arguments normalize to an empty object.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = if arguments.is_null() {
            Value::Object(Map::new())
        } else {
            arguments
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Serialized argument size, used for size-based routing.
    pub fn payload_bytes(&self) -> usize {
        serde_json::to_vec(&self.arguments).map(|v| v.len()).unwrap_or(0)
    }
}

/// One output item of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolOutput {
    Text { text: String },
    Json { value: Value },
}

impl ToolOutput {
    /// Render as plain text.
    pub fn as_text(&self) -> String {
        match self {
            ToolOutput::Text { text } => text.clone(),
            ToolOutput::Json { value } => value.to_string(),
        }
    }
}

/// Advertised tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Performs tool calls against a provider.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `call` on `provider`.
    async fn execute(&self, provider: Provider, call: &ToolCall) -> Result<Vec<ToolOutput>>;

    /// Tools this executor can run.
    fn list_tools(&self) -> Vec<ToolDescriptor>;
}

/// Executor with a single `echo` tool that returns its arguments.
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn execute(&self, _provider: Provider, call: &ToolCall) -> Result<Vec<ToolOutput>> {
        match call.name.as_str() {
            "echo" => Ok(vec![ToolOutput::Json {
                value: call.arguments.clone(),
            }]),
            other => Err(GatewayError::InvalidToolCall(format!("unknown tool: {}", other))),
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "echo".to_string(),
            description: "Return the arguments unchanged".to_string(),
            input_schema: json!({ "type": "object" }),
        }]
    }
}
