//! Gateway error taxonomy.
//!
//! Admission-layer rejections (rate limit, open circuit, session cap) are
//! returned to the caller as typed values; nothing in this crate retries them.

use std::time::Duration;
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::security::rate_limit::LimitScope;

/// Errors surfaced by the resilience and routing layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A token bucket rejected the request.
    #[error("Rate limit exceeded at {scope} scope, retry after {retry_after:?}")]
    AdmissionRejected {
        scope: LimitScope,
        retry_after: Duration,
    },

    /// Creating another session would exceed `max_concurrent_sessions`.
    #[error("Session limit exceeded ({limit} concurrent sessions)")]
    SessionLimitExceeded { limit: usize },

    /// The session was closed or never existed.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The named circuit breaker is open and failing fast.
    #[error("Circuit breaker '{name}' is open, retry after {retry_after:?}")]
    CircuitOpenRejected { name: String, retry_after: Duration },

    /// The tool executor failed, timed out, or was cancelled.
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// The caller asked for something no provider can run: an unknown tool
    /// or arguments the tool rejects. Not held against the provider.
    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),

    /// The external store could not be reached.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] PersistenceError),
}

/// Fieldless mirror of [`GatewayError`] for code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    SessionLimitExceeded,
    SessionNotFound,
    CircuitOpen,
    ToolExecutionFailed,
    InvalidToolCall,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code used on both wire protocols.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::SessionLimitExceeded => "SESSION_LIMIT_EXCEEDED",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            ErrorKind::InvalidToolCall => "INVALID_PARAMS",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::AdmissionRejected { .. } => ErrorKind::RateLimited,
            GatewayError::SessionLimitExceeded { .. } => ErrorKind::SessionLimitExceeded,
            GatewayError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            GatewayError::CircuitOpenRejected { .. } => ErrorKind::CircuitOpen,
            GatewayError::ToolExecutionFailed(_) => ErrorKind::ToolExecutionFailed,
            GatewayError::InvalidToolCall(_) => ErrorKind::InvalidToolCall,
            GatewayError::PersistenceFailure(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Failures caused by the request itself, not by the provider.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, GatewayError::InvalidToolCall(_))
    }

    /// Suggested client back-off, when the rejection carries one.
    ///
    /// `None` for a limit that will not lift by waiting.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::AdmissionRejected { retry_after, .. }
            | GatewayError::CircuitOpenRejected { retry_after, .. } => {
                Some(*retry_after).filter(|d| *d != Duration::MAX)
            }
            _ => None,
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = GatewayError::SessionLimitExceeded { limit: 3 };
        assert_eq!(err.code(), "SESSION_LIMIT_EXCEEDED");
        assert!(err.to_string().contains("3 concurrent"));

        let err = GatewayError::CircuitOpenRejected {
            name: "claude".into(),
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert!(!err.is_caller_error());
    }

    #[test]
    fn unbounded_wait_carries_no_retry_hint() {
        let err = GatewayError::AdmissionRejected {
            scope: LimitScope::User,
            retry_after: Duration::MAX,
        };
        assert_eq!(err.code(), "RATE_LIMITED");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn invalid_tool_call_is_a_caller_error() {
        let err = GatewayError::InvalidToolCall("unknown tool: nope".into());
        assert_eq!(err.kind(), ErrorKind::InvalidToolCall);
        assert_eq!(err.code(), "INVALID_PARAMS");
        assert!(err.is_caller_error());
        assert!(!GatewayError::ToolExecutionFailed("503".into()).is_caller_error());
    }
}
