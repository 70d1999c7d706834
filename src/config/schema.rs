//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::providers::Provider;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Multi-level rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Per-provider circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Session lifecycle settings.
    pub session: SessionConfig,

    /// Routing cache settings.
    pub cache: CacheConfig,

    /// Provider selection settings.
    pub providers: ProvidersConfig,

    /// Client authentication for the op protocol.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8765").
    pub bind_address: String,

    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8765".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single tool execution in seconds.
    pub tool_execution_secs: f64,

    /// How long shutdown waits for open connections to close.
    pub shutdown_drain_secs: f64,
}

impl TimeoutConfig {
    pub fn tool_execution(&self) -> Duration {
        Duration::from_secs_f64(self.tool_execution_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_execution_secs: 120.0,
            shutdown_drain_secs: 10.0,
        }
    }
}

/// Rate limiting configuration. Capacities are tokens, rates are tokens/sec.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub global_capacity: f64,
    pub global_refill_rate: f64,

    pub ip_capacity: f64,
    pub ip_refill_rate: f64,

    pub user_capacity: f64,
    pub user_refill_rate: f64,

    /// How often idle buckets are swept.
    pub cleanup_interval_secs: u64,

    /// Buckets unused for this long are dropped.
    pub inactive_threshold_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_capacity: 1000.0,
            global_refill_rate: 100.0,
            ip_capacity: 100.0,
            ip_refill_rate: 10.0,
            user_capacity: 50.0,
            user_refill_rate: 5.0,
            cleanup_interval_secs: 300,
            inactive_threshold_secs: 3600,
        }
    }
}

/// Circuit breaker configuration, shared by every provider breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures in CLOSED before opening.
    pub failure_threshold: u32,

    /// Base open timeout in seconds.
    pub timeout_secs: f64,

    /// Trial calls admitted while HALF_OPEN.
    pub half_open_max_calls: u32,

    /// Successes in HALF_OPEN before closing.
    pub success_threshold: u32,

    /// Upper bound for the grown open timeout.
    pub max_timeout_secs: f64,

    /// Open timeout growth factor after a failed trial call.
    pub backoff_multiplier: f64,

    /// TTL of the persisted breaker record.
    pub state_ttl_secs: u64,

    /// How often breakers re-read the shared store.
    pub reload_interval_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_secs: 60.0,
            half_open_max_calls: 3,
            success_threshold: 2,
            max_timeout_secs: 300.0,
            backoff_multiplier: 2.0,
            state_ttl_secs: 24 * 3600,
            reload_interval_secs: 30,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is stale.
    pub timeout_secs: f64,

    /// Hard cap on live sessions.
    pub max_concurrent_sessions: usize,

    /// Simultaneous in-flight requests per session.
    pub max_inflight: usize,

    /// How often stale sessions are swept.
    pub cleanup_interval_secs: u64,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600.0,
            max_concurrent_sessions: 1000,
            max_inflight: 4,
            cleanup_interval_secs: 300,
        }
    }
}

/// Routing cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for routing decisions and other categories on the default strategy.
    pub default_ttl_secs: u64,

    /// Maximum number of entries.
    pub max_size: usize,

    /// How often expired entries are swept.
    pub cleanup_interval_secs: u64,

    /// Where to snapshot the cache on shutdown (optional).
    pub snapshot_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_size: 10_000,
            cleanup_interval_secs: 60,
            snapshot_path: None,
        }
    }
}

/// Provider selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Canonical default provider.
    pub default: Provider,

    /// Payloads at or above this size prefer the large-context provider.
    pub large_payload_bytes: usize,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: Provider::Claude,
            large_payload_bytes: 100_000,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted hello tokens. Empty accepts any non-empty token.
    pub tokens: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [circuit_breaker]
            failure_threshold = 2

            [providers]
            default = "gemini"
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.half_open_max_calls, 3);
        assert_eq!(config.providers.default, Provider::Gemini);
        assert_eq!(config.session.max_inflight, 4);
        assert!(config.rate_limit.enabled);
    }
}
