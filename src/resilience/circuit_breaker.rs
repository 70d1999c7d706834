//! Circuit breaker for provider protection, persisted in the shared store.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: provider assumed down, requests fail fast
//! - Half-Open: limited trial calls test for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= failure_threshold
//! Open → Half-Open: current timeout elapsed since opening
//! Half-Open → Closed: successes >= success_threshold, no failure in between
//! Half-Open → Open: any failure; timeout = min(timeout * multiplier, max_timeout)
//! ```
//!
//! # Design Decisions
//! - One breaker per provider (not global)
//! - State loaded lazily from the store on first use, then cached
//! - Every transition and every recorded outcome is written back; a store
//!   failure is logged and the in-memory state stays authoritative
//! - `CallGuard` settles exactly once; dropping it unsettled counts as failure

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, Result};
use crate::observability::metrics;
use crate::persistence::{self, unix_time, PersistenceService};
use crate::resilience::backoff::next_open_timeout;

const KEY_PREFIX: &str = "circuit_breaker:";

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted breaker record. Times are unix seconds, `timeout` is seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    #[serde(skip)]
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<f64>,
    pub last_state_change: f64,
    pub timeout: f64,
    pub half_open_calls: u32,
}

impl CircuitBreakerState {
    fn closed(name: &str, base_timeout: f64) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            last_state_change: unix_time(),
            timeout: base_timeout,
            half_open_calls: 0,
        }
    }

    fn open_remaining(&self, now: f64) -> Duration {
        let remaining = self.last_state_change + self.timeout - now;
        Duration::from_secs_f64(remaining.max(0.0))
    }
}

struct Slot {
    loaded: bool,
    record: CircuitBreakerState,
}

struct BreakerInner {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn PersistenceService>,
    slot: Mutex<Slot>,
}

/// A named circuit breaker backed by the persistence service.
#[derive(Clone)]
pub struct PersistentCircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl PersistentCircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn PersistenceService>) -> Self {
        let name = name.into();
        let record = CircuitBreakerState::closed(&name, config.timeout_secs);
        Self {
            inner: Arc::new(BreakerInner {
                name,
                config,
                store,
                slot: Mutex::new(Slot { loaded: false, record }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.inner.name)
    }

    /// Current state, loading from the store on first use.
    ///
    /// An OPEN breaker whose timeout has elapsed reads as HALF_OPEN.
    pub async fn state(&self) -> CircuitState {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        self.promote_if_cooled(&mut slot).await;
        slot.record.state
    }

    /// Copy of the full record.
    pub async fn snapshot(&self) -> CircuitBreakerState {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        self.promote_if_cooled(&mut slot).await;
        slot.record.clone()
    }

    /// Whether `acquire` would admit a call right now: CLOSED, or HALF_OPEN
    /// with a trial slot free.
    pub async fn admits_calls(&self) -> bool {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        self.promote_if_cooled(&mut slot).await;
        match slot.record.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => slot.record.half_open_calls < self.inner.config.half_open_max_calls,
            CircuitState::Open => false,
        }
    }

    async fn promote_if_cooled(&self, slot: &mut Slot) {
        let now = unix_time();
        if slot.record.state == CircuitState::Open && slot.record.open_remaining(now).is_zero() {
            self.transition(&mut slot.record, CircuitState::HalfOpen, now);
            self.persist(&slot.record).await;
        }
    }

    /// Re-read the shared record so transitions made by other replicas show up.
    pub async fn refresh(&self) {
        let mut slot = self.inner.slot.lock().await;
        match self.load().await {
            Some(record) => {
                if record.state != slot.record.state {
                    tracing::info!(
                        circuit_breaker = %self.inner.name,
                        from = %slot.record.state,
                        to = %record.state,
                        "Circuit breaker state converged from store"
                    );
                    metrics::record_breaker_state(&self.inner.name, record.state);
                }
                slot.record = record;
                slot.loaded = true;
            }
            None => slot.loaded = true,
        }
    }

    /// Entry guard. Rejects while OPEN (until the timeout elapses) and once
    /// HALF_OPEN has admitted `half_open_max_calls` trial calls.
    pub async fn acquire(&self) -> Result<CallGuard> {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        self.promote_if_cooled(&mut slot).await;

        match slot.record.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                metrics::record_breaker_call(&self.inner.name, "rejected", Duration::ZERO);
                return Err(GatewayError::CircuitOpenRejected {
                    name: self.inner.name.clone(),
                    retry_after: slot.record.open_remaining(unix_time()),
                });
            }
            CircuitState::HalfOpen => {
                if slot.record.half_open_calls >= self.inner.config.half_open_max_calls {
                    metrics::record_breaker_call(&self.inner.name, "rejected", Duration::ZERO);
                    return Err(GatewayError::CircuitOpenRejected {
                        name: self.inner.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                slot.record.half_open_calls += 1;
                self.persist(&slot.record).await;
            }
        }

        Ok(CallGuard {
            breaker: self.clone(),
            started: Instant::now(),
            settled: false,
        })
    }

    /// Run `f` under the breaker guard.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire().await?;
        match f().await {
            Ok(value) => {
                guard.success().await;
                Ok(value)
            }
            Err(e) if e.is_caller_error() => {
                guard.release().await;
                Err(e)
            }
            Err(e) => {
                guard.failure().await;
                Err(e)
            }
        }
    }

    /// Give back a HALF_OPEN trial slot for a call that produced no verdict.
    pub async fn record_neutral(&self) {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        if slot.record.state == CircuitState::HalfOpen && slot.record.half_open_calls > 0 {
            slot.record.half_open_calls -= 1;
            self.persist(&slot.record).await;
        }
    }

    pub async fn record_success(&self) {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        let now = unix_time();
        let record = &mut slot.record;

        match record.state {
            CircuitState::Closed => {
                record.failures = 0;
            }
            CircuitState::HalfOpen => {
                record.successes += 1;
                if record.successes >= self.inner.config.success_threshold {
                    self.transition(record, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
        self.persist(&slot.record).await;
    }

    pub async fn record_failure(&self) {
        let mut slot = self.inner.slot.lock().await;
        self.ensure_loaded(&mut slot).await;
        let now = unix_time();
        let record = &mut slot.record;

        record.failures += 1;
        record.last_failure_time = Some(now);
        match record.state {
            CircuitState::Closed => {
                if record.failures >= self.inner.config.failure_threshold {
                    self.transition(record, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                record.timeout = next_open_timeout(
                    record.timeout,
                    self.inner.config.backoff_multiplier,
                    self.inner.config.max_timeout_secs,
                );
                self.transition(record, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
        self.persist(&slot.record).await;
    }

    fn transition(&self, record: &mut CircuitBreakerState, to: CircuitState, now: f64) {
        let from = record.state;
        record.state = to;
        record.last_state_change = now;
        match to {
            CircuitState::Closed => {
                record.failures = 0;
                record.successes = 0;
                record.half_open_calls = 0;
                record.timeout = self.inner.config.timeout_secs;
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                record.successes = 0;
                record.half_open_calls = 0;
            }
        }

        tracing::info!(
            circuit_breaker = %self.inner.name,
            from = %from,
            to = %to,
            timeout_secs = record.timeout,
            "Circuit breaker state transition"
        );
        metrics::record_breaker_state(&self.inner.name, to);
    }

    async fn ensure_loaded(&self, slot: &mut Slot) {
        if slot.loaded {
            return;
        }
        if let Some(record) = self.load().await {
            slot.record = record;
        }
        slot.loaded = true;
    }

    async fn load(&self) -> Option<CircuitBreakerState> {
        let key = self.key();
        match self.inner.store.get(&key).await {
            Ok(Some(value)) => match persistence::decode::<CircuitBreakerState>(&key, value) {
                Ok(mut record) => {
                    record.name = self.inner.name.clone();
                    Some(record)
                }
                Err(e) => {
                    tracing::warn!(circuit_breaker = %self.inner.name, error = %e, "Ignoring malformed breaker record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(circuit_breaker = %self.inner.name, error = %e, "Failed to load breaker state, using in-memory state");
                None
            }
        }
    }

    async fn persist(&self, record: &CircuitBreakerState) {
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(circuit_breaker = %self.inner.name, error = %e, "Failed to encode breaker state");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .store
            .set_with_ttl(&self.key(), value, self.inner.config.state_ttl())
            .await
        {
            tracing::warn!(circuit_breaker = %self.inner.name, error = %e, "Failed to persist breaker state");
        }
    }
}

/// Admission ticket for one protected call.
///
/// Settle with [`CallGuard::success`] or [`CallGuard::failure`]. A guard
/// dropped without settling (cancelled future, panic) records a failure.
pub struct CallGuard {
    breaker: PersistentCircuitBreaker,
    started: Instant,
    settled: bool,
}

impl CallGuard {
    pub async fn success(mut self) {
        self.settled = true;
        metrics::record_breaker_call(self.breaker.name(), "success", self.started.elapsed());
        self.breaker.record_success().await;
    }

    pub async fn failure(mut self) {
        self.settled = true;
        metrics::record_breaker_call(self.breaker.name(), "failure", self.started.elapsed());
        self.breaker.record_failure().await;
    }

    /// Settle without an outcome: the call failed for reasons of its own.
    pub async fn release(mut self) {
        self.settled = true;
        metrics::record_breaker_call(self.breaker.name(), "caller_error", self.started.elapsed());
        self.breaker.record_neutral().await;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        metrics::record_breaker_call(self.breaker.name(), "cancelled", self.started.elapsed());
        let breaker = self.breaker.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    breaker.record_failure().await;
                });
            }
            Err(_) => {
                tracing::warn!(circuit_breaker = %breaker.name(), "Call guard dropped outside runtime, outcome lost");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout_secs: 0.05,
            half_open_max_calls: 2,
            success_threshold: 2,
            max_timeout_secs: 0.15,
            backoff_multiplier: 2.0,
            ..CircuitBreakerConfig::default()
        }
    }

    fn breaker(store: &MemoryStore) -> PersistentCircuitBreaker {
        PersistentCircuitBreaker::new("claude", config(), Arc::new(store.clone()))
    }

    async fn trip(cb: &PersistentCircuitBreaker) {
        for _ in 0..3 {
            cb.record_failure().await;
        }
    }

    async fn fail_call(cb: &PersistentCircuitBreaker) -> Result<()> {
        cb.call(|| async { Err::<(), _>(GatewayError::ToolExecutionFailed("boom".into())) }).await
    }

    #[tokio::test]
    async fn opens_only_at_threshold() {
        let store = MemoryStore::new();
        let cb = breaker(&store);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_in_closed_resets_failure_run() {
        let cb = breaker(&MemoryStore::new());
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.snapshot().await.failures, 1);
    }

    #[tokio::test]
    async fn open_fails_fast_without_running_call() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;

        let mut ran = false;
        let result = cb
            .call(|| {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(GatewayError::CircuitOpenRejected { .. })));
        assert!(!ran);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;
        tokio::time::sleep(Duration::from_millis(70)).await;

        cb.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.call(|| async { Ok(()) }).await.unwrap();
        let snap = cb.snapshot().await;
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.successes, 0);
        assert_eq!(snap.half_open_calls, 0);
        assert!((snap.timeout - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cooled_breaker_reads_half_open_and_admits_a_trial_call() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;
        assert!(!cb.admits_calls().await);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.admits_calls().await);

        let _g1 = cb.acquire().await.unwrap();
        let _g2 = cb.acquire().await.unwrap();
        assert!(!cb.admits_calls().await);
    }

    #[tokio::test]
    async fn half_open_limits_trial_calls() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;
        tokio::time::sleep(Duration::from_millis(70)).await;

        let g1 = cb.acquire().await.unwrap();
        let g2 = cb.acquire().await.unwrap();
        assert!(matches!(cb.acquire().await, Err(GatewayError::CircuitOpenRejected { .. })));

        g1.success().await;
        g2.success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_grows_timeout_to_cap() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(fail_call(&cb).await.is_err());
        let snap = cb.snapshot().await;
        assert_eq!(snap.state, CircuitState::Open);
        assert!((snap.timeout - 0.1).abs() < 1e-9);

        // Still open after the base timeout: the grown one applies
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(cb.acquire().await, Err(GatewayError::CircuitOpenRejected { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fail_call(&cb).await.is_err());
        assert!((cb.snapshot().await.timeout - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let store = MemoryStore::new();
        let cb = breaker(&store);
        trip(&cb).await;

        let restarted = breaker(&store);
        let snap = restarted.snapshot().await;
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failures, 3);
        assert_eq!(snap.name, "claude");
    }

    #[tokio::test]
    async fn refresh_picks_up_other_replica() {
        let store = MemoryStore::new();
        let a = breaker(&store);
        let b = breaker(&store);
        assert_eq!(b.state().await, CircuitState::Closed);

        trip(&a).await;
        assert_eq!(b.state().await, CircuitState::Closed);
        b.refresh().await;
        assert_eq!(b.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn store_outage_keeps_in_memory_state() {
        let store = MemoryStore::new();
        store.set_available(false);
        let cb = breaker(&store);
        trip(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn caller_errors_do_not_trip_the_breaker() {
        let cb = breaker(&MemoryStore::new());
        for _ in 0..5 {
            let result = cb
                .call(|| async { Err::<(), _>(GatewayError::InvalidToolCall("unknown tool".into())) })
                .await;
            assert!(matches!(result, Err(GatewayError::InvalidToolCall(_))));
        }
        let snap = cb.snapshot().await;
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
    }

    #[tokio::test]
    async fn caller_error_returns_the_half_open_slot() {
        let cb = breaker(&MemoryStore::new());
        trip(&cb).await;
        tokio::time::sleep(Duration::from_millis(70)).await;

        for _ in 0..3 {
            let _ = cb
                .call(|| async { Err::<(), _>(GatewayError::InvalidToolCall("bad args".into())) })
                .await;
        }
        let snap = cb.snapshot().await;
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.half_open_calls, 0);
        assert!(cb.admits_calls().await);
    }

    #[tokio::test]
    async fn dropped_guard_counts_as_failure() {
        let cb = breaker(&MemoryStore::new());
        let guard = cb.acquire().await.unwrap();
        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.snapshot().await.failures, 1);
    }
}
