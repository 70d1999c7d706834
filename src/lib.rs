//! Tool Gateway Library
//!
//! Resilience and routing layer for a WebSocket tool gateway speaking an
//! op-based protocol and JSON-RPC 2.0 on the same endpoint.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod persistence;
pub mod protocol;
pub mod providers;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod session;

pub use config::schema::GatewayConfig;
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::Gateway;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use protocol::ProtocolAdapter;
