//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to provider:
//!     → circuit_breaker.rs (entry guard: fail fast while open)
//!     → timeouts.rs (enforce execution deadline)
//!     → circuit_breaker.rs (exit guard: record outcome, persist transition)
//!     → backoff.rs (grow open timeout after a failed trial call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every tool execution has a deadline
//! - No retries here: rejections are returned to the caller as-is
//! - Circuit breaker state lives in the shared store so replicas converge

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CallGuard, CircuitBreakerState, CircuitState, PersistentCircuitBreaker};
