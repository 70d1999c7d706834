//! Protocol-level errors and their wire codes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorKind, GatewayError};

/// JSON-RPC 2.0 reserved codes plus the gateway's server-defined range.
pub mod jsonrpc_codes {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const TOOL_EXECUTION_FAILED: i32 = -32000;
    pub const RATE_LIMITED: i32 = -32001;
    pub const CIRCUIT_OPEN: i32 = -32002;
    pub const SESSION_LIMIT_EXCEEDED: i32 = -32003;
    pub const SESSION_NOT_FOUND: i32 = -32004;
    pub const AUTHENTICATION_REQUIRED: i32 = -32005;
}

/// Every failure a client can see on the wire.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Unsupported protocol version: {0}")]
    ProtocolVersionRequired(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    /// A pipeline rejection or execution failure, already rendered.
    #[error("{message}")]
    Gateway {
        kind: ErrorKind,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// String code used by the op protocol and in JSON-RPC error data.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            ProtocolError::ProtocolVersionRequired(_) => "PROTOCOL_VERSION_REQUIRED",
            ProtocolError::UnknownOperation(_) => "UNKNOWN_OPERATION",
            ProtocolError::MethodNotFound(_) => "METHOD_NOT_FOUND",
            ProtocolError::InvalidParams(_) => "INVALID_PARAMS",
            ProtocolError::InvalidProtocol(_) => "INVALID_PROTOCOL",
            ProtocolError::Gateway { kind, .. } => kind.code(),
            ProtocolError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn jsonrpc_code(&self) -> i32 {
        use jsonrpc_codes::*;
        match self {
            ProtocolError::AuthenticationRequired => AUTHENTICATION_REQUIRED,
            ProtocolError::UnknownOperation(_) | ProtocolError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ProtocolError::ProtocolVersionRequired(_) | ProtocolError::InvalidParams(_) => INVALID_PARAMS,
            ProtocolError::InvalidProtocol(_) => INVALID_REQUEST,
            ProtocolError::Internal(_) => INTERNAL_ERROR,
            ProtocolError::Gateway { kind, .. } => match kind {
                ErrorKind::RateLimited => RATE_LIMITED,
                ErrorKind::SessionLimitExceeded => SESSION_LIMIT_EXCEEDED,
                ErrorKind::SessionNotFound => SESSION_NOT_FOUND,
                ErrorKind::CircuitOpen => CIRCUIT_OPEN,
                ErrorKind::ToolExecutionFailed => TOOL_EXECUTION_FAILED,
                ErrorKind::InvalidToolCall => INVALID_PARAMS,
                ErrorKind::Internal => INTERNAL_ERROR,
            },
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProtocolError::Gateway { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Wire body shared by both protocols.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            retry_after_ms: self.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

impl From<GatewayError> for ProtocolError {
    fn from(err: GatewayError) -> Self {
        ProtocolError::Gateway {
            kind: err.kind(),
            message: err.to_string(),
            retry_after: err.retry_after(),
        }
    }
}

/// `{"code", "message", "retry_after_ms"?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}
