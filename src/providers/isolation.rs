//! Provider isolation and selection.
//!
//! # Responsibilities
//! - Own one circuit breaker per provider
//! - Pick a healthy provider, falling over to the alternate when the
//!   preferred one is unhealthy
//! - Run the protected call inside the chosen provider's breaker

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Provider, ProviderHealth, ProviderRegistry};
use crate::config::{CircuitBreakerConfig, ProvidersConfig};
use crate::error::Result;
use crate::observability::metrics;
use crate::persistence::PersistenceService;
use crate::resilience::PersistentCircuitBreaker;

/// Request facts used by the no-preference heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionHint {
    pub payload_bytes: usize,
}

/// Counters kept under the manager lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionStats {
    pub cascade_preventions: u64,
    pub selections: BTreeMap<Provider, u64>,
}

/// Per-provider failure isolation.
pub struct ProviderIsolationManager {
    breakers: HashMap<Provider, PersistentCircuitBreaker>,
    registry: Arc<dyn ProviderRegistry>,
    config: ProvidersConfig,
    stats: Mutex<SelectionStats>,
}

impl ProviderIsolationManager {
    pub fn new(
        breaker_config: CircuitBreakerConfig,
        config: ProvidersConfig,
        registry: Arc<dyn ProviderRegistry>,
        store: Arc<dyn PersistenceService>,
    ) -> Self {
        let breakers = Provider::ALL
            .into_iter()
            .map(|p| {
                let breaker = PersistentCircuitBreaker::new(p.as_str(), breaker_config.clone(), store.clone());
                (p, breaker)
            })
            .collect();

        Self {
            breakers,
            registry,
            config,
            stats: Mutex::new(SelectionStats::default()),
        }
    }

    /// The breaker guarding `provider`.
    pub fn breaker(&self, provider: Provider) -> &PersistentCircuitBreaker {
        // Every variant gets a breaker in `new`
        &self.breakers[&provider]
    }

    /// Selectable: CLOSED, or cooled down and ready for a trial call.
    async fn healthy(&self, provider: Provider) -> bool {
        self.breaker(provider).admits_calls().await
    }

    pub async fn is_healthy(&self, provider: Provider) -> bool {
        self.healthy(provider).await
    }

    /// Choose the provider for a call.
    pub async fn select_provider(&self, preferred: Option<Provider>, hint: &SelectionHint) -> Provider {
        let mut stats = self.stats.lock().await;

        let (chosen, reason) = match preferred {
            Some(preferred) => {
                if self.healthy(preferred).await {
                    (preferred, "preferred")
                } else {
                    let alternate = preferred.alternate();
                    if self.healthy(alternate).await {
                        stats.cascade_preventions += 1;
                        tracing::warn!(
                            preferred = %preferred,
                            substitute = %alternate,
                            "Preferred provider unhealthy, routing to alternate"
                        );
                        metrics::record_cascade_prevention(preferred.as_str(), alternate.as_str());
                        (alternate, "failover")
                    } else {
                        tracing::warn!(
                            preferred = %preferred,
                            "All providers unhealthy, keeping preferred provider"
                        );
                        (preferred, "all_unhealthy")
                    }
                }
            }
            None => {
                let mut healthy = Vec::with_capacity(Provider::ALL.len());
                for p in Provider::ALL {
                    if self.healthy(p).await {
                        healthy.push(p);
                    }
                }
                match healthy.len() {
                    0 => (self.config.default, "all_unhealthy"),
                    1 => (healthy[0], "only_healthy"),
                    _ => self.pick_among(&healthy, hint),
                }
            }
        };

        *stats.selections.entry(chosen).or_insert(0) += 1;
        metrics::record_provider_selection(chosen.as_str(), reason);
        tracing::debug!(provider = %chosen, reason, "Provider selected");
        chosen
    }

    /// Whether `hint` triggers size-based routing.
    pub fn is_large_payload(&self, hint: &SelectionHint) -> bool {
        hint.payload_bytes >= self.config.large_payload_bytes
    }

    fn pick_among(&self, healthy: &[Provider], hint: &SelectionHint) -> (Provider, &'static str) {
        if self.is_large_payload(hint) {
            let largest = healthy
                .iter()
                .copied()
                .max_by_key(|p| self.registry.capabilities(*p).max_context_bytes);
            if let Some(p) = largest {
                return (p, "large_payload");
            }
        }
        if healthy.contains(&self.config.default) {
            (self.config.default, "default")
        } else {
            (healthy[0], "first_healthy")
        }
    }

    /// Run `f` inside `provider`'s breaker.
    pub async fn execute_on<F, Fut, T>(&self, provider: Provider, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker(provider).call(f).await
    }

    /// Select a provider, then run `f` for it under its breaker.
    ///
    /// The manager lock covers selection only.
    pub async fn execute_with_isolation<F, Fut, T>(
        &self,
        preferred: Option<Provider>,
        hint: &SelectionHint,
        f: F,
    ) -> Result<(Provider, T)>
    where
        F: FnOnce(Provider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = self.select_provider(preferred, hint).await;
        let value = self.execute_on(provider, || f(provider)).await?;
        Ok((provider, value))
    }

    /// Health view of every provider.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let mut views = Vec::with_capacity(Provider::ALL.len());
        for p in Provider::ALL {
            let record = self.breaker(p).snapshot().await;
            views.push(ProviderHealth::from_breaker(p, &record));
        }
        views
    }

    pub async fn stats(&self) -> SelectionStats {
        self.stats.lock().await.clone()
    }

    pub async fn cascade_preventions(&self) -> u64 {
        self.stats.lock().await.cascade_preventions
    }

    /// Re-read every breaker from the shared store.
    pub async fn refresh_all(&self) {
        for p in Provider::ALL {
            self.breaker(p).refresh().await;
        }
    }

    pub fn registry(&self) -> &Arc<dyn ProviderRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::persistence::MemoryStore;
    use crate::providers::StaticProviderRegistry;
    use crate::resilience::CircuitState;
    use std::time::Duration;

    fn manager() -> ProviderIsolationManager {
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: 2,
            timeout_secs: 60.0,
            ..CircuitBreakerConfig::default()
        };
        ProviderIsolationManager::new(
            breaker_config,
            ProvidersConfig {
                default: Provider::Claude,
                large_payload_bytes: 1_000,
            },
            Arc::new(StaticProviderRegistry::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    async fn open(manager: &ProviderIsolationManager, p: Provider) {
        manager.breaker(p).record_failure().await;
        manager.breaker(p).record_failure().await;
        assert_eq!(manager.breaker(p).state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn healthy_preferred_is_used() {
        let m = manager();
        let hint = SelectionHint::default();
        assert_eq!(m.select_provider(Some(Provider::Gemini), &hint).await, Provider::Gemini);
        assert_eq!(m.cascade_preventions().await, 0);
    }

    #[tokio::test]
    async fn unhealthy_preferred_fails_over_and_counts() {
        let m = manager();
        open(&m, Provider::Claude).await;

        let chosen = m.select_provider(Some(Provider::Claude), &SelectionHint::default()).await;
        assert_eq!(chosen, Provider::Gemini);
        assert_eq!(m.cascade_preventions().await, 1);
    }

    #[tokio::test]
    async fn both_unhealthy_keeps_preferred() {
        let m = manager();
        open(&m, Provider::Claude).await;
        open(&m, Provider::Gemini).await;

        let chosen = m.select_provider(Some(Provider::Claude), &SelectionHint::default()).await;
        assert_eq!(chosen, Provider::Claude);
        assert_eq!(m.cascade_preventions().await, 0);

        // The preferred breaker then rejects explicitly
        let result = m
            .execute_with_isolation(Some(Provider::Claude), &SelectionHint::default(), |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(GatewayError::CircuitOpenRejected { .. })));
    }

    #[tokio::test]
    async fn cooled_provider_is_selected_again() {
        let m = ProviderIsolationManager::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                timeout_secs: 0.05,
                half_open_max_calls: 2,
                success_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
            ProvidersConfig::default(),
            Arc::new(StaticProviderRegistry::new()),
            Arc::new(MemoryStore::new()),
        );
        open(&m, Provider::Claude).await;
        let hint = SelectionHint::default();
        assert_eq!(m.select_provider(Some(Provider::Claude), &hint).await, Provider::Gemini);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(m.select_provider(Some(Provider::Claude), &hint).await, Provider::Claude);
        assert_eq!(m.select_provider(None, &hint).await, Provider::Claude);
        assert_eq!(m.cascade_preventions().await, 1);

        let (provider, _) = m
            .execute_with_isolation(Some(Provider::Claude), &hint, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(provider, Provider::Claude);
        assert_eq!(m.breaker(Provider::Claude).state().await, CircuitState::HalfOpen);

        m.breaker(Provider::Claude).record_success().await;
        assert_eq!(m.breaker(Provider::Claude).state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn no_preference_uses_default_or_size_heuristic() {
        let m = manager();
        let small = SelectionHint { payload_bytes: 10 };
        let large = SelectionHint { payload_bytes: 5_000 };
        assert_eq!(m.select_provider(None, &small).await, Provider::Claude);
        assert_eq!(m.select_provider(None, &large).await, Provider::Gemini);
    }

    #[tokio::test]
    async fn no_preference_with_one_or_none_healthy() {
        let m = manager();
        open(&m, Provider::Claude).await;
        assert_eq!(m.select_provider(None, &SelectionHint::default()).await, Provider::Gemini);

        open(&m, Provider::Gemini).await;
        assert_eq!(m.select_provider(None, &SelectionHint::default()).await, Provider::Claude);
    }

    #[tokio::test]
    async fn failures_stay_in_their_domain() {
        let m = manager();
        let hint = SelectionHint::default();
        for _ in 0..2 {
            let _ = m
                .execute_with_isolation(Some(Provider::Claude), &hint, |_| async {
                    Err::<(), _>(GatewayError::ToolExecutionFailed("upstream 500".into()))
                })
                .await;
        }

        let health = m.health().await;
        let claude = health.iter().find(|h| h.provider == Provider::Claude).unwrap();
        let gemini = health.iter().find(|h| h.provider == Provider::Gemini).unwrap();
        assert!(!claude.is_healthy);
        assert_eq!(claude.circuit_state, CircuitState::Open);
        assert!(gemini.is_healthy);

        let (provider, value) = m
            .execute_with_isolation(Some(Provider::Claude), &hint, |p| async move { Ok(p.as_str()) })
            .await
            .unwrap();
        assert_eq!(provider, Provider::Gemini);
        assert_eq!(value, "gemini");
    }
}
