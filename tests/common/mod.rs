//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tool_gateway::config::GatewayConfig;
use tool_gateway::error::{GatewayError, Result};
use tool_gateway::gateway::{Gateway, ToolCall, ToolDescriptor, ToolExecutor, ToolOutput};
use tool_gateway::lifecycle::{self, Shutdown};
use tool_gateway::persistence::{MemoryStore, PersistenceService};
use tool_gateway::providers::{Provider, StaticProviderRegistry};

/// Records every call it receives and echoes the arguments back.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(Provider, ToolCall)>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<(Provider, ToolCall)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, provider: Provider, call: &ToolCall) -> Result<Vec<ToolOutput>> {
        self.calls.lock().push((provider, call.clone()));
        Ok(vec![ToolOutput::Json {
            value: call.arguments.clone(),
        }])
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "echo".into(),
            description: "Echo".into(),
            input_schema: json!({ "type": "object" }),
        }]
    }
}

/// Fails every call on the given provider, succeeds elsewhere.
pub struct FailingExecutor {
    pub failing: Provider,
    pub attempts: AtomicU32,
}

impl FailingExecutor {
    pub fn new(failing: Provider) -> Self {
        Self {
            failing,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for FailingExecutor {
    async fn execute(&self, provider: Provider, _call: &ToolCall) -> Result<Vec<ToolOutput>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if provider == self.failing {
            Err(GatewayError::ToolExecutionFailed(format!("{} upstream 503", provider)))
        } else {
            Ok(vec![ToolOutput::Text {
                text: provider.as_str().to_string(),
            }])
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }
}

/// Sleeps before answering.
pub struct SlowExecutor(pub Duration);

#[async_trait]
impl ToolExecutor for SlowExecutor {
    async fn execute(&self, _provider: Provider, call: &ToolCall) -> Result<Vec<ToolOutput>> {
        tokio::time::sleep(self.0).await;
        Ok(vec![ToolOutput::Text { text: call.name.clone() }])
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        Vec::new()
    }
}

/// A gateway serving on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

pub async fn start_server(config: GatewayConfig, executor: Arc<dyn ToolExecutor>) -> TestServer {
    start_server_with_store(config, executor, Arc::new(MemoryStore::new())).await
}

pub async fn start_server_with_store(
    config: GatewayConfig,
    executor: Arc<dyn ToolExecutor>,
    store: Arc<dyn PersistenceService>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let services = lifecycle::initialize(&config, store, Arc::new(StaticProviderRegistry::new()), executor).await;
    let gateway = services.gateway.clone();
    let shutdown = Shutdown::new();
    let serve_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { lifecycle::serve(services, &config, listener, serve_shutdown).await });

    TestServer {
        addr,
        gateway,
        shutdown,
        handle,
    }
}

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(server: &TestServer) -> Client {
    let (socket, _) = connect_async(server.ws_url()).await.unwrap();
    socket
}

/// Send one JSON frame and wait for the next text reply.
pub async fn request(client: &mut Client, frame: Value) -> Value {
    client.send(Message::Text(frame.to_string().into())).await.unwrap();
    next_json(client).await
}

pub async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}
