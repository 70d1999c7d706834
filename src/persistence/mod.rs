//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! Circuit breaker transitions ──┐
//!                               ├─→ PersistenceService (get / set-with-ttl / delete)
//! Session activity ─────────────┘        → shared key-value store (all replicas)
//!
//! Startup:
//!     keys_with_prefix("session:") → rehydrate active sessions
//! ```
//!
//! # Design Decisions
//! - Store is a narrow trait so tests substitute `MemoryStore`
//! - Values are JSON documents; schema lives with the owning component
//! - Callers treat every error as soft and fall back to in-memory state

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored document did not match the expected shape.
    #[error("malformed record '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// Minimal key-value interface over the external store.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Store a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<(), PersistenceError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// List live keys beginning with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError>;
}

/// Decode a stored JSON document into a typed record.
pub fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Value) -> Result<T, PersistenceError> {
    serde_json::from_value(value).map_err(|e| PersistenceError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Wall-clock seconds since the unix epoch. Persisted timestamps use this so
/// every replica reading the store agrees on them.
pub fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
