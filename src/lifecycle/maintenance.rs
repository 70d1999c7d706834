//! Periodic housekeeping.
//!
//! # Responsibilities
//! - Drop idle rate-limit buckets
//! - Close stale sessions
//! - Sweep expired cache entries
//! - Reload breaker state written by other instances

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::GatewayConfig;
use crate::gateway::Gateway;

/// Sweep intervals, one per housekeeping job.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceIntervals {
    pub rate_limit: Duration,
    pub sessions: Duration,
    pub cache: Duration,
    pub breakers: Duration,
}

impl MaintenanceIntervals {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let secs = |s: u64| Duration::from_secs(s.max(1));
        Self {
            rate_limit: secs(config.rate_limit.cleanup_interval_secs),
            sessions: secs(config.session.cleanup_interval_secs),
            cache: secs(config.cache.cleanup_interval_secs),
            breakers: secs(config.circuit_breaker.reload_interval_secs),
        }
    }
}

pub struct MaintenanceTask {
    gateway: Arc<Gateway>,
    intervals: MaintenanceIntervals,
}

impl MaintenanceTask {
    pub fn new(gateway: Arc<Gateway>, intervals: MaintenanceIntervals) -> Self {
        Self { gateway, intervals }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(intervals = ?self.intervals, "Maintenance task starting");

        let ticker = |period: Duration| {
            // First tick is one period out, not immediate
            let mut t = time::interval_at(time::Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        };
        let mut rate_limit = ticker(self.intervals.rate_limit);
        let mut sessions = ticker(self.intervals.sessions);
        let mut cache = ticker(self.intervals.cache);
        let mut breakers = ticker(self.intervals.breakers);

        loop {
            tokio::select! {
                _ = rate_limit.tick() => {
                    let removed = self.gateway.rate_limiter().cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, "Dropped idle rate-limit buckets");
                    }
                }
                _ = sessions.tick() => {
                    self.gateway.sessions().cleanup_stale().await;
                }
                _ = cache.tick() => {
                    self.gateway.cache().cleanup_expired();
                }
                _ = breakers.tick() => {
                    self.gateway.isolation().refresh_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::gateway::EchoExecutor;
    use crate::lifecycle::Shutdown;
    use crate::persistence::MemoryStore;
    use crate::providers::StaticProviderRegistry;
    use crate::routing::CacheCategory;
    use serde_json::json;

    #[tokio::test]
    async fn sweeps_expired_entries_until_shutdown() {
        let config = GatewayConfig::default();
        let gateway = Arc::new(Gateway::from_config(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticProviderRegistry::new()),
            Arc::new(EchoExecutor),
        ));
        gateway
            .cache()
            .set(CacheCategory::Routing, "gone", json!("claude"), Some(Duration::from_millis(10)));

        let intervals = MaintenanceIntervals {
            rate_limit: Duration::from_millis(20),
            sessions: Duration::from_millis(20),
            cache: Duration::from_millis(20),
            breakers: Duration::from_millis(20),
        };
        let shutdown = Shutdown::new();
        let task = tokio::spawn(MaintenanceTask::new(gateway.clone(), intervals).run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gateway.cache().is_empty());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let mut config = GatewayConfig::default();
        config.cache.cleanup_interval_secs = 0;
        let intervals = MaintenanceIntervals::from_config(&config);
        assert_eq!(intervals.cache, Duration::from_secs(1));
    }
}
