//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Fields, not formatted strings: `session_id = %id`, `provider = %p`
//! - Recording a metric without an installed exporter is a no-op
//! - `RUST_LOG` always overrides the configured level

pub mod logging;
pub mod metrics;
