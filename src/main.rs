//! Tool Gateway
//!
//! WebSocket gateway that admits, routes and isolates tool calls across
//! model providers.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────────────┐
//!                         │                     TOOL GATEWAY                       │
//!                         │                                                        │
//!     WebSocket frame     │  ┌─────────┐    ┌──────────┐    ┌────────────────┐    │
//!     ────────────────────┼─▶│  http   │───▶│ protocol │───▶│    gateway     │    │
//!                         │  │ /ws     │    │ op|json  │    │   pipeline     │    │
//!                         │  └─────────┘    └──────────┘    └───────┬────────┘    │
//!                         │                                         │             │
//!                         │        ┌────────────┬───────────┬───────┴──────┐      │
//!                         │        ▼            ▼           ▼              ▼      │
//!                         │  ┌──────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐  │
//!                         │  │ security │ │ session │ │ routing  │ │providers │  │
//!                         │  │rate limit│ │ manager │ │  cache   │ │isolation │  │
//!                         │  └──────────┘ └────┬────┘ └──────────┘ └────┬─────┘  │
//!                         │                    │                        │        │
//!                         │                    ▼                        ▼        │
//!                         │              ┌─────────────────────────────────┐     │
//!                         │              │  persistence (sessions, breakers)│    │
//!                         │              └─────────────────────────────────┘     │
//!                         └───────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use tool_gateway::config::loader::load_config;
use tool_gateway::config::GatewayConfig;
use tool_gateway::gateway::EchoExecutor;
use tool_gateway::lifecycle::{self, shutdown_signal, Shutdown};
use tool_gateway::observability::{logging, metrics};
use tool_gateway::persistence::MemoryStore;
use tool_gateway::providers::StaticProviderRegistry;

#[derive(Parser, Debug)]
#[command(name = "tool-gateway", version, about = "Resilient tool gateway")]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tool-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tool_timeout_secs = config.timeouts.tool_execution_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = lifecycle::initialize(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(StaticProviderRegistry::new()),
        Arc::new(EchoExecutor),
    )
    .await;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    lifecycle::serve(services, &config, listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
