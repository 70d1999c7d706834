//! The dispatch pipeline shared by both wire protocols.

use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RequestContext, ToolCall, ToolDescriptor, ToolExecutor, ToolOutput};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::persistence::PersistenceService;
use crate::providers::{Provider, ProviderIsolationManager, ProviderRegistry, SelectionHint};
use crate::resilience::timeouts::with_deadline;
use crate::routing::{CacheCategory, RoutingCache};
use crate::security::rate_limit::{Admission, RateLimiter};
use crate::session::SessionManager;

const TOOL_LIST_KEY: &str = "all";

/// Wires admission, sessions, routing and isolation around the executor.
pub struct Gateway {
    rate_limiter: Arc<RateLimiter>,
    sessions: Arc<SessionManager>,
    isolation: Arc<ProviderIsolationManager>,
    cache: Arc<RoutingCache>,
    executor: Arc<dyn ToolExecutor>,
    tool_timeout: Duration,
}

impl Gateway {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        sessions: Arc<SessionManager>,
        isolation: Arc<ProviderIsolationManager>,
        cache: Arc<RoutingCache>,
        executor: Arc<dyn ToolExecutor>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            rate_limiter,
            sessions,
            isolation,
            cache,
            executor,
            tool_timeout,
        }
    }

    /// Build every component from config over one shared store.
    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn PersistenceService>,
        registry: Arc<dyn ProviderRegistry>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self::new(
            Arc::new(RateLimiter::new(config.rate_limit.clone())),
            Arc::new(SessionManager::new(config.session.clone(), store.clone())),
            Arc::new(ProviderIsolationManager::new(
                config.circuit_breaker.clone(),
                config.providers.clone(),
                registry,
                store,
            )),
            Arc::new(RoutingCache::new(&config.cache)),
            executor,
            config.timeouts.tool_execution(),
        )
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn isolation(&self) -> &Arc<ProviderIsolationManager> {
        &self.isolation
    }

    pub fn cache(&self) -> &Arc<RoutingCache> {
        &self.cache
    }

    /// Advertised tools, cached under the tool list category.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        if let Some(tools) = self
            .cache
            .get(CacheCategory::ToolList, TOOL_LIST_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
        {
            return tools;
        }

        let tools = self.executor.list_tools();
        match serde_json::to_value(&tools) {
            Ok(value) => self.cache.set(CacheCategory::ToolList, TOOL_LIST_KEY, value, None),
            Err(e) => tracing::warn!(error = %e, "Failed to cache tool list"),
        }
        tools
    }

    /// Run one tool call through the full pipeline.
    pub async fn dispatch(&self, ctx: &RequestContext, call: &ToolCall) -> Result<Vec<ToolOutput>> {
        if let Admission::Rejected { scope, retry_after } = self.rate_limiter.is_allowed(ctx.ip(), ctx.user(), 1.0) {
            return Err(GatewayError::AdmissionRejected { scope, retry_after });
        }

        let session = self.sessions.ensure(&ctx.session_id, &ctx.client).await?;
        let _permit = session.acquire().await?;
        let started = Instant::now();

        let route = self.route(ctx, call).await;
        let executor = &self.executor;
        let provider = route.provider;
        let result = self
            .isolation
            .execute_on(provider, || {
                let run = AssertUnwindSafe(executor.execute(provider, call))
                    .catch_unwind()
                    .map(|outcome| match outcome {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::ToolExecutionFailed("tool executor panicked".into())),
                    });
                with_deadline(self.tool_timeout, run)
            })
            .await;

        let elapsed = started.elapsed();
        self.sessions.record_request(&session, elapsed);

        match &result {
            Ok(_) => tracing::debug!(
                session_id = %ctx.session_id,
                tool = %call.name,
                provider = %provider,
                elapsed_ms = elapsed.as_millis() as u64,
                "Tool call completed"
            ),
            Err(e) => {
                if matches!(e, GatewayError::CircuitOpenRejected { .. }) && route.cached {
                    self.cache.invalidate(CacheCategory::Routing, &route.key);
                }
                tracing::warn!(
                    session_id = %ctx.session_id,
                    tool = %call.name,
                    provider = %provider,
                    code = e.code(),
                    error = %e,
                    "Tool call failed"
                );
            }
        }
        result
    }

    async fn route(&self, ctx: &RequestContext, call: &ToolCall) -> Route {
        let hint = SelectionHint {
            payload_bytes: call.payload_bytes(),
        };
        let key = if self.isolation.is_large_payload(&hint) {
            format!("{}#large", call.name)
        } else {
            call.name.clone()
        };

        // A client preference wins over the registry's per-tool pin
        let preferred = ctx
            .preferred_provider
            .or_else(|| self.isolation.registry().preferred_for(&call.name));

        if preferred.is_none() {
            let cached: Option<Provider> = self
                .cache
                .get(CacheCategory::Routing, &key)
                .and_then(|v| serde_json::from_value(v).ok());
            if let Some(provider) = cached {
                if self.isolation.is_healthy(provider).await {
                    return Route {
                        provider,
                        cached: true,
                        key,
                    };
                }
                self.cache.invalidate(CacheCategory::Routing, &key);
            }
        }

        let provider = self.isolation.select_provider(preferred, &hint).await;
        if preferred.is_none() && self.isolation.is_healthy(provider).await {
            self.cache.set(CacheCategory::Routing, &key, json!(provider), None);
        }
        Route {
            provider,
            cached: false,
            key,
        }
    }
}

struct Route {
    provider: Provider,
    cached: bool,
    key: String,
}
