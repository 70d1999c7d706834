//! HTTP and WebSocket transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, connection cap, /health)
//!     → GET /ws upgrade
//!     → websocket.rs (per-connection loop, strictly in order)
//!     → protocol::ProtocolAdapter::handle_text
//!     → reply frame written back on the same socket
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, GatewayServer, HealthReport};
