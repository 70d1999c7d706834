//! Provider health view.
//!
//! Derived on demand from a provider's breaker record, never stored.
//! Healthy means the breaker is CLOSED.

use serde::Serialize;

use super::Provider;
use crate::persistence::unix_time;
use crate::resilience::{CircuitBreakerState, CircuitState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub provider: Provider,
    pub is_healthy: bool,
    pub circuit_state: CircuitState,
    pub failures: u32,
    pub last_check: f64,
}

impl ProviderHealth {
    pub fn from_breaker(provider: Provider, record: &CircuitBreakerState) -> Self {
        Self {
            provider,
            is_healthy: record.state == CircuitState::Closed,
            circuit_state: record.state,
            failures: record.failures,
            last_check: unix_time(),
        }
    }
}
