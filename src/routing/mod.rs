//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request for tool T
//!     → cache.rs get(Routing, T)
//!         hit  → reuse the cached provider (skip selection)
//!         miss → provider selection → cache.rs set(Routing, T, provider)
//!     → breaker rejects cached provider → cache.rs invalidate(Routing, T)
//!
//! Shutdown:  snapshot_to_file(path)   (non-expired entries only)
//! Startup:   restore_from_file(path)  (warm start)
//! ```
//!
//! # Design Decisions
//! - Keys are `category:identifier`; each category maps to a TTL strategy
//! - Expiry is lazy on read plus a sweep once occupancy passes 80%
//! - Eviction is strictly least-recently-accessed

pub mod cache;

pub use cache::{CacheCategory, CacheEntry, CacheStats, CacheStrategy, RoutingCache};
