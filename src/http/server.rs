//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router (`/ws` upgrade, `/health` report)
//! - Refuse upgrades past the connection cap
//! - Wire up tracing middleware
//! - Serve until the shutdown broadcast fires

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::http::websocket::serve_connection;
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;
use crate::protocol::ProtocolAdapter;
use crate::providers::{ProviderHealth, SelectionStats};
use crate::routing::CacheStats;
use crate::session::{ClientInfo, SessionStats};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<ProtocolAdapter>,
    pub connections: ConnectionTracker,
    pub shutdown: Shutdown,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `ok` when every provider is healthy, otherwise `degraded`.
    pub status: &'static str,
    pub providers: Vec<ProviderHealth>,
    pub sessions: SessionStats,
    pub cache: CacheStats,
    pub selection: SelectionStats,
    pub connections: u64,
}

/// WebSocket server in front of the protocol adapter.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    pub fn new(adapter: Arc<ProtocolAdapter>, max_connections: usize, shutdown: Shutdown) -> Self {
        Self {
            state: AppState {
                adapter,
                connections: ConnectionTracker::new(max_connections),
                shutdown,
            },
        }
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.state.connections
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway server starting");

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let mut shutdown_rx = self.state.shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

/// Upgrade to a WebSocket if a connection slot is free.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(guard) = state.connections.try_track() else {
        tracing::warn!(peer = %addr, "Connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    let client = ClientInfo {
        ip_address: Some(addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..ClientInfo::default()
    };
    let shutdown_rx = state.shutdown.subscribe();
    let adapter = state.adapter.clone();

    ws.on_upgrade(move |socket| serve_connection(socket, adapter, guard, client, shutdown_rx))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = state.adapter.gateway();
    let providers = gateway.isolation().health().await;
    let status = if providers.iter().all(|p| p.is_healthy) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthReport {
        status,
        providers,
        sessions: gateway.sessions().stats().await,
        cache: gateway.cache().stats(),
        selection: gateway.isolation().stats().await,
        connections: state.connections.active_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::adapter::testing::adapter;

    #[tokio::test]
    async fn health_reports_ok_with_fresh_breakers() {
        let server = GatewayServer::new(Arc::new(adapter()), 8, Shutdown::new());
        let response = health_handler(State(server.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["status"], "ok");
        assert_eq!(report["providers"].as_array().unwrap().len(), 2);
        assert_eq!(report["connections"], 0);
    }

    #[tokio::test]
    async fn health_reports_degraded_with_open_breaker() {
        let adapter = adapter();
        let breaker = adapter.gateway().isolation().breaker(crate::providers::Provider::Gemini);
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        let server = GatewayServer::new(Arc::new(adapter), 8, Shutdown::new());
        let response = health_handler(State(server.state.clone())).await.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["status"], "degraded");
    }
}
