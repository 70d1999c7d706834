//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build components → Recover sessions → Restore cache → Reload breakers → Serve
//!
//! Background (maintenance.rs):
//!     Periodic sweeps of buckets, sessions, cache entries; breaker reloads
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close sockets → Snapshot cache → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: state is recovered before the listener serves traffic
//! - Every long-running task subscribes to one shutdown broadcast

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use maintenance::MaintenanceTask;
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{initialize, serve, Services};
