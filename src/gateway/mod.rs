//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! Canonical call (tool name, arguments) + RequestContext
//!     → security::RateLimiter        admission (global → ip → user)
//!     → session::SessionManager      ensure session, acquire in-flight slot
//!     → routing::RoutingCache        cached provider for this tool?
//!     → providers::Isolation         select healthy provider (on miss)
//!     → resilience::CircuitBreaker   execute under breaker + deadline
//!     → ToolExecutor                 the actual work
//!     → session accounting, slot released on every exit path
//! ```
//!
//! # Design Decisions
//! - Components are constructed once and injected; nothing is global
//! - Rejections come back as typed errors and are never retried here
//! - Tokens consumed at admission are kept even when execution fails

pub mod context;
pub mod executor;
pub mod pipeline;

pub use context::RequestContext;
pub use executor::{EchoExecutor, ToolCall, ToolDescriptor, ToolExecutor, ToolOutput};
pub use pipeline::Gateway;
