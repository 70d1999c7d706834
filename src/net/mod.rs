//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade request
//!     → connection.rs try_track() (connection cap)
//!     → ConnectionGuard held for the socket's lifetime
//!     → Hand off to the per-connection message loop
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Upgrades past the cap are refused before the handshake completes

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
