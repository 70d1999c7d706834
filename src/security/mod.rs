//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming tool call:
//!     → rate_limit.rs (global → per-IP → per-user token buckets)
//!     → Pass to session admission
//! ```
//!
//! # Design Decisions
//! - Fail closed: the first exhausted scope rejects the call
//! - Tokens taken from earlier scopes are returned on rejection

pub mod rate_limit;

pub use rate_limit::{Admission, LimitScope, RateLimiter, TokenBucket};
