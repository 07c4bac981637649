//! The HTTP server: the JSON-RPC endpoint, the WebSocket streaming endpoint, and a health check,
//! all on one listener, with an orderly shutdown.
use crate::mcp::{McpService, MockToolbox};
use crate::streaming::{ws, ConnectionRegistry, RegistryConfig};
use crate::Result;
use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use mockmcp_jsonrpc::{HttpTransport, HttpTransportConfig, JsonRpcServer};
use serde_json::{json, Value};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::*;

pub const MCP_PATH: &str = "/mcp";
pub const WS_PATH: &str = "/ws";
pub const HEALTH_PATH: &str = "/health";

/// Runtime-configurable settings for the server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub http: HttpTransportConfig,
    pub registry: RegistryConfig,

    /// How long open HTTP connections get to finish after shutdown starts
    pub shutdown_grace: Duration,

    /// How long stream tasks then get to exit before the server gives up on them
    pub task_drain: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            http: HttpTransportConfig::default(),
            registry: RegistryConfig::default(),
            shutdown_grace: Duration::from_secs(2),
            task_drain: Duration::from_secs(1),
        }
    }
}

pub struct MockServer {
    config: ServerConfig,
    toolbox: Arc<MockToolbox>,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
}

impl MockServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            toolbox: Arc::new(MockToolbox::default()),
            registry: ConnectionRegistry::new(config.registry.clone()),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The JSON-RPC handler, for transports other than HTTP
    pub fn rpc_server(&self) -> JsonRpcServer<McpService<MockToolbox>> {
        JsonRpcServer::new(McpService::new(self.toolbox.clone()))
    }

    pub fn router(&self) -> Router {
        let mcp = HttpTransport::new(
            self.rpc_server(),
            self.config.http.clone(),
            self.shutdown.clone(),
        )
        .into_router(MCP_PATH);

        Router::new()
            .route(WS_PATH, get(ws::upgrade))
            .route(HEALTH_PATH, get(health))
            .with_state(self.registry.clone())
            .merge(mcp)
    }

    /// Bind the configured address and serve until `signal` completes
    pub async fn run(self, signal: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind))?;

        self.serve(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` completes, then shut down: streaming
    /// clients are told goodbye and dropped, SSE channels end, in-flight requests get
    /// [`ServerConfig::shutdown_grace`] to finish and stream tasks get [`ServerConfig::task_drain`]
    /// to exit.  Whatever is still running after that is abandoned.
    pub async fn serve(self, listener: TcpListener, signal: impl Future<Output = ()>) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "Listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut serving = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
                .into_future(),
        );

        tokio::select! {
            _ = signal => info!("Shutdown requested"),
            result = &mut serving => {
                error!("Server stopped unexpectedly");
                self.registry.shutdown("Server stopped");
                return result
                    .context("Server task panicked")?
                    .context("Server failed");
            }
        }

        self.registry.shutdown("Server is shutting down");
        self.shutdown.cancel();

        match tokio::time::timeout(self.config.shutdown_grace, &mut serving).await {
            Ok(result) => result
                .context("Server task panicked")?
                .context("Server failed")?,
            Err(_) => {
                warn!(
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "Connections still open after grace period; abandoning them"
                );
                serving.abort();
            }
        }

        if tokio::time::timeout(self.config.task_drain, self.registry.wait_for_streams())
            .await
            .is_err()
        {
            warn!(
                running = self.registry.running_streams(),
                "Stream tasks still running; abandoning them"
            );
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn health(State(registry): State<ConnectionRegistry>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": registry.connection_count(),
        "streams": registry.stream_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::Instant;
    use tower::ServiceExt;

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read until a complete response head has arrived
    async fn read_head(socket: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the response head");
            head.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&head).into_owned()
    }

    /// Read until the server hangs up, one way or another
    async fn read_until_closed(socket: &mut TcpStream) {
        let mut buf = [0u8; 1024];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    }

    /// A small masked text frame, which is what a WebSocket client must send
    fn client_text_frame(text: &str) -> Vec<u8> {
        let payload = text.as_bytes();
        assert!(payload.len() < 126);
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut frame = vec![0x81, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        frame
    }

    #[tokio::test]
    async fn health_reports_registry_counts() {
        let server = MockServer::new(ServerConfig::default());
        let _registration = server.registry().register(None).unwrap();

        let response = server
            .router()
            .oneshot(Request::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"status": "ok", "connections": 1, "streams": 0})
        );
    }

    #[tokio::test]
    async fn mcp_endpoint_is_mounted() {
        let server = MockServer::new(ServerConfig::default());

        let response = server
            .router()
            .oneshot(
                Request::post(MCP_PATH)
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::ACCEPT, "application/json, text/event-stream")
                    .body(Body::from(
                        json!({"jsonrpc": "2.0", "id": "x", "method": "tools/call",
                               "params": {"name": "no_such_tool"}})
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "x");
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Unknown tool: no_such_tool");

        let response = server
            .router()
            .oneshot(
                Request::options(MCP_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("DELETE"));
    }

    #[tokio::test]
    async fn ws_endpoint_requires_an_upgrade() {
        let server = MockServer::new(ServerConfig::default());
        let response = server
            .router()
            .oneshot(Request::get(WS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn serves_over_tcp_and_shuts_down() {
        crate::test_helpers::init_test_logging();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = MockServer::new(ServerConfig::default());
        let registry = server.registry().clone();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.serve(listener, async {
            let _ = stopped.await;
        }));

        let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        socket.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#""status":"ok""#), "{response}");

        stop.send(()).unwrap();
        running.await.unwrap().unwrap();
        assert!(registry.register(None).is_err());
    }

    #[tokio::test]
    async fn shutdown_with_live_clients_is_bounded() {
        crate::test_helpers::init_test_logging();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig {
            shutdown_grace: Duration::from_millis(500),
            task_drain: Duration::from_millis(500),
            ..Default::default()
        };
        let deadline = config.shutdown_grace + config.task_drain + Duration::from_millis(500);
        let server = MockServer::new(config);
        let registry = server.registry().clone();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.serve(listener, async {
            let _ = stopped.await;
        }));

        let mut sse = TcpStream::connect(addr).await.unwrap();
        sse.write_all(b"GET /mcp HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        let head = read_head(&mut sse).await;
        assert!(head.starts_with("HTTP/1.1 200"), "{head}");
        assert!(head.contains("text/event-stream"), "{head}");

        let mut ws = TcpStream::connect(addr).await.unwrap();
        ws.write_all(
            b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();
        let head = read_head(&mut ws).await;
        assert!(head.starts_with("HTTP/1.1 101"), "{head}");
        ws.write_all(&client_text_frame(
            r#"{"type":"start_stream","streamType":"sensor_data","config":{"interval":100}}"#,
        ))
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.running_streams() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stream never started");
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.stream_count(), 1);

        let started = Instant::now();
        stop.send(()).unwrap();
        tokio::time::timeout(deadline, running)
            .await
            .expect("serve outlived its grace and drain periods")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < deadline);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.running_streams(), 0);

        // Neither client is left hanging
        tokio::time::timeout(Duration::from_secs(2), read_until_closed(&mut sse))
            .await
            .expect("SSE channel still open");
        tokio::time::timeout(Duration::from_secs(2), read_until_closed(&mut ws))
            .await
            .expect("WebSocket still open");
    }
}
