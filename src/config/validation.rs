//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, multipliers >= 1, capacities > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.timeouts.tool_execution_secs <= 0.0 {
        errors.push(ValidationError::new("timeouts.tool_execution_secs", "must be > 0"));
    }
    if !(0.0..=f64::MAX).contains(&config.timeouts.shutdown_drain_secs) {
        errors.push(ValidationError::new("timeouts.shutdown_drain_secs", "must be a finite value >= 0"));
    }

    let rl = &config.rate_limit;
    for (field, value) in [
        ("rate_limit.global_capacity", rl.global_capacity),
        ("rate_limit.ip_capacity", rl.ip_capacity),
        ("rate_limit.user_capacity", rl.user_capacity),
    ] {
        if value <= 0.0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    for (field, value) in [
        ("rate_limit.global_refill_rate", rl.global_refill_rate),
        ("rate_limit.ip_refill_rate", rl.ip_refill_rate),
        ("rate_limit.user_refill_rate", rl.user_refill_rate),
    ] {
        if value < 0.0 {
            errors.push(ValidationError::new(field, "must be >= 0"));
        }
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be > 0"));
    }
    if cb.half_open_max_calls < cb.success_threshold {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_calls",
            "must be >= success_threshold or HALF_OPEN can never close",
        ));
    }
    if cb.timeout_secs <= 0.0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_secs", "must be > 0"));
    }
    if cb.max_timeout_secs < cb.timeout_secs {
        errors.push(ValidationError::new("circuit_breaker.max_timeout_secs", "must be >= timeout_secs"));
    }
    if cb.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("circuit_breaker.backoff_multiplier", "must be >= 1.0"));
    }

    if config.session.max_concurrent_sessions == 0 {
        errors.push(ValidationError::new("session.max_concurrent_sessions", "must be > 0"));
    }
    if config.session.max_inflight == 0 {
        errors.push(ValidationError::new("session.max_inflight", "must be > 0"));
    }
    if config.session.timeout_secs <= 0.0 {
        errors.push(ValidationError::new("session.timeout_secs", "must be > 0"));
    }

    if config.cache.max_size == 0 {
        errors.push(ValidationError::new("cache.max_size", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn max_timeout_below_base_is_rejected() {
        let mut config = GatewayConfig::default();
        config.circuit_breaker.timeout_secs = 10.0;
        config.circuit_breaker.max_timeout_secs = 5.0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "circuit_breaker.max_timeout_secs");
    }

    #[test]
    fn negative_drain_timeout_is_rejected() {
        let mut config = GatewayConfig::default();
        config.timeouts.shutdown_drain_secs = -1.0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "timeouts.shutdown_drain_secs");
    }
}
