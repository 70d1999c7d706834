//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! First message for a session id:
//!     → manager.rs ensure(): memory → store recovery → create (capped)
//! Each request:
//!     → session.rs acquire(): bounded in-flight permit (RAII)
//!     → manager.rs record_request(): counters + background persist
//! Periodic sweep:
//!     → manager.rs cleanup_stale(): drop idle sessions from memory and store
//! Process start:
//!     → manager.rs recover_all_sessions(): rehydrate every active record
//! ```
//!
//! # Design Decisions
//! - The in-flight permit is released on drop, so every exit path frees it
//! - Persistence is best-effort; a store failure never fails a request
//! - Recovered sessions get a fresh guard sized from their stored limit

pub mod manager;
pub mod session;

pub use manager::{SessionManager, SessionStats};
pub use session::{ClientInfo, InflightPermit, Session, SessionData, SessionRecord, SessionStatus};
