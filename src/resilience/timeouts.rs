//! Timeout enforcement for tool execution.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - A timeout is an execution failure, so breakers and sessions account
//!   for it like any other failed call

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Await `fut` for at most `limit`.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::ToolExecutionFailed(format!(
            "timed out after {:.3}s",
            limit.as_secs_f64()
        ))),
    }
}
