//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_breaker_calls_total` (counter): breaker calls by name, outcome
//! - `gateway_breaker_call_duration_seconds` (histogram): protected call latency
//! - `gateway_breaker_state` (gauge): 0=closed, 0.5=half_open, 1=open
//! - `gateway_provider_selections_total` (counter): by provider, reason
//! - `gateway_cascade_preventions_total` (counter): by preferred, substitute
//! - `gateway_active_sessions` (gauge)
//! - `gateway_cache_lookups_total` (counter): by category, result
//! - `gateway_cache_evictions_total` (counter)
//! - `gateway_cache_entries` (gauge)
//! - `gateway_protocol_messages_total` (counter): by protocol, outcome
//! - `gateway_active_connections` (gauge)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limited(scope: &str) {
    counter!("gateway_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_breaker_call(name: &str, outcome: &'static str, duration: Duration) {
    counter!("gateway_breaker_calls_total", "breaker" => name.to_string(), "outcome" => outcome).increment(1);
    if outcome != "rejected" {
        histogram!("gateway_breaker_call_duration_seconds", "breaker" => name.to_string())
            .record(duration.as_secs_f64());
    }
}

pub fn record_breaker_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Open => 1.0,
    };
    gauge!("gateway_breaker_state", "breaker" => name.to_string()).set(value);
}

pub fn record_provider_selection(provider: &str, reason: &'static str) {
    counter!("gateway_provider_selections_total", "provider" => provider.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_cascade_prevention(preferred: &str, substitute: &str) {
    counter!(
        "gateway_cascade_preventions_total",
        "preferred" => preferred.to_string(),
        "substitute" => substitute.to_string()
    )
    .increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("gateway_active_sessions").set(count as f64);
}

pub fn record_cache_lookup(category: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_lookups_total", "category" => category.to_string(), "result" => result).increment(1);
}

pub fn record_cache_evictions(count: usize) {
    counter!("gateway_cache_evictions_total").increment(count as u64);
}

pub fn record_cache_size(entries: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
}

pub fn record_protocol_message(protocol: &'static str, outcome: &'static str) {
    counter!("gateway_protocol_messages_total", "protocol" => protocol, "outcome" => outcome).increment(1);
}

pub fn record_connections(count: usize) {
    gauge!("gateway_active_connections").set(count as f64);
}
