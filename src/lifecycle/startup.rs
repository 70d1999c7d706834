//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every component from the validated configuration
//! - Recover persisted state before traffic is accepted
//! - Start background tasks, then serve until shutdown
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - The listener starts last (traffic only when ready)

use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::gateway::{Gateway, ToolExecutor};
use crate::http::GatewayServer;
use crate::lifecycle::maintenance::{MaintenanceIntervals, MaintenanceTask};
use crate::lifecycle::Shutdown;
use crate::persistence::PersistenceService;
use crate::protocol::ProtocolAdapter;
use crate::providers::ProviderRegistry;

/// The long-lived components a running gateway is made of.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<Gateway>,
    pub adapter: Arc<ProtocolAdapter>,
}

/// Build the components and recover state from the store and cache snapshot.
pub async fn initialize(
    config: &GatewayConfig,
    store: Arc<dyn PersistenceService>,
    registry: Arc<dyn ProviderRegistry>,
    executor: Arc<dyn ToolExecutor>,
) -> Services {
    let gateway = Arc::new(Gateway::from_config(config, store, registry, executor));

    let recovered = gateway.sessions().recover_all_sessions().await;
    gateway.isolation().refresh_all().await;

    if let Some(path) = &config.cache.snapshot_path {
        if let Err(e) = gateway.cache().restore_from_file(path) {
            tracing::warn!(path = %path, error = %e, "Cache snapshot not restored, starting cold");
        }
    }

    tracing::info!(
        recovered_sessions = recovered,
        cached_entries = gateway.cache().len(),
        "Gateway state initialized"
    );

    let adapter = Arc::new(ProtocolAdapter::new(gateway.clone(), config.auth.clone()));
    Services { gateway, adapter }
}

/// Serve until `shutdown` fires, drain open sockets, then snapshot the cache.
pub async fn serve(
    services: Services,
    config: &GatewayConfig,
    listener: TcpListener,
    shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    let maintenance = MaintenanceTask::new(services.gateway.clone(), MaintenanceIntervals::from_config(config));
    let maintenance = tokio::spawn(maintenance.run(shutdown.subscribe()));

    let server = GatewayServer::new(services.adapter.clone(), config.listener.max_connections, shutdown);
    let connections = server.connections().clone();
    let result = server.run(listener).await;

    // Upgraded sockets outlive the HTTP server; wait for their close handling
    if connections.wait_for_drain(config.timeouts.shutdown_drain()).await {
        tracing::info!("All connections drained");
    } else {
        tracing::warn!(
            remaining = connections.active_count(),
            "Shutdown drain timed out with connections still open"
        );
    }

    if let Err(e) = maintenance.await {
        tracing::error!(error = %e, "Maintenance task failed");
    }

    if let Some(path) = &config.cache.snapshot_path {
        if let Err(e) = services.gateway.cache().snapshot_to_file(path) {
            tracing::error!(path = %path, error = %e, "Failed to save cache snapshot");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::EchoExecutor;
    use crate::persistence::MemoryStore;
    use crate::providers::StaticProviderRegistry;
    use crate::routing::CacheCategory;
    use crate::session::ClientInfo;
    use serde_json::json;

    #[tokio::test]
    async fn initialize_recovers_sessions_and_cache() {
        let store: Arc<dyn PersistenceService> = Arc::new(MemoryStore::new());
        let path = std::env::temp_dir().join(format!("gateway-startup-{}.json", uuid::Uuid::new_v4()));
        let mut config = GatewayConfig::default();
        config.cache.snapshot_path = Some(path.to_string_lossy().into_owned());

        let first = initialize(
            &config,
            store.clone(),
            Arc::new(StaticProviderRegistry::new()),
            Arc::new(EchoExecutor),
        )
        .await;
        first.gateway.sessions().ensure("s1", &ClientInfo::default()).await.unwrap();
        first
            .gateway
            .cache()
            .set(CacheCategory::ServerInfo, "main", json!({"v": 1}), None);
        first.gateway.cache().snapshot_to_file(&path).unwrap();

        let second = initialize(
            &config,
            store,
            Arc::new(StaticProviderRegistry::new()),
            Arc::new(EchoExecutor),
        )
        .await;
        assert!(second.gateway.sessions().get("s1").await.is_some());
        assert_eq!(
            second.gateway.cache().get(CacheCategory::ServerInfo, "main"),
            Some(json!({"v": 1}))
        );

        let _ = std::fs::remove_file(path);
    }
}
