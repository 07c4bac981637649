//! The HTTP transport: a single endpoint that speaks JSON-RPC over plain HTTP responses or
//! Server-Sent Events, depending on the HTTP method and what the client says it accepts.
//!
//! This is the "streamable HTTP" transport from the MCP spec, minus resumption:
//! <https://spec.modelcontextprotocol.io/specification/basic/transports/#streamable-http>
//!
//! | Method  | Behavior                                                                     |
//! |---------|------------------------------------------------------------------------------|
//! | OPTIONS | CORS preflight, empty 200                                                    |
//! | GET     | long-lived SSE channel carrying heartbeats, if `text/event-stream` accepted  |
//! | POST    | one JSON-RPC message, answered as JSON or as a single SSE frame              |
//! | DELETE  | session termination acknowledgement                                          |
//!
//! Anything else gets a 405.
use super::negotiate::{self, ResponseFormat};
use crate::server::{JsonRpcHandler, JsonRpcServer, MessageOutcome, MethodContext};
use crate::shared::{JsonRpcClientMessage, JsonRpcError, RpcResponse};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

pub const PROTOCOL_VERSION_HEADER: HeaderName = HeaderName::from_static("mcp-protocol-version");
pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("mcp-session-id");
pub const LAST_EVENT_ID_HEADER: HeaderName = HeaderName::from_static("last-event-id");

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS, DELETE";
const ALLOWED_HEADERS: &str =
    "Content-Type, Accept, Authorization, Mcp-Protocol-Version, Mcp-Session-Id, Last-Event-ID";

/// Runtime-configurable settings for the HTTP transport
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// How often a comment-only frame is written to idle SSE channels so that proxies and load
    /// balancers don't time them out.
    pub heartbeat_interval: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Exposes a [`JsonRpcServer`] over HTTP.
///
/// The transport itself holds no per-client state; sessions are accepted and echoed but never
/// looked up.
pub struct HttpTransport<H> {
    server: JsonRpcServer<H>,
    config: Arc<HttpTransportConfig>,
    shutdown: CancellationToken,
}

impl<H> Clone for HttpTransport<H> {
    fn clone(&self) -> Self {
        Self {
            server: self.server.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H> HttpTransport<H>
where
    H: JsonRpcHandler,
{
    /// `shutdown` ends every open SSE channel when it is cancelled.
    pub fn new(
        server: JsonRpcServer<H>,
        config: HttpTransportConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            server,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Build a router serving the JSON-RPC endpoint at `path`.
    pub fn into_router(self, path: &str) -> Router {
        Router::new()
            .route(path, any(dispatch::<H>))
            .with_state(self)
    }

    /// Long-lived server-to-client channel.  Nothing but heartbeats is ever pushed on it; every
    /// `GET` starts from scratch.
    fn open_event_stream(&self, headers: &HeaderMap) -> Response {
        if !negotiate::accepts_event_stream(header_str(headers, &header::ACCEPT)) {
            return not_acceptable("Not Acceptable: client must accept text/event-stream");
        }

        if let Some(last_event_id) = header_str(headers, &LAST_EVENT_ID_HEADER) {
            debug!(
                last_event_id,
                "Stream resumption is not supported; opening a fresh event stream"
            );
        }

        let channel = ChannelGuard::open();
        let period = self.config.heartbeat_interval;
        let heartbeats = IntervalStream::new(tokio::time::interval_at(
            tokio::time::Instant::now() + period,
            period,
        ))
        .map(move |_| {
            trace!(channel = %channel.0, "Heartbeat");
            Ok::<_, Infallible>(Event::default().comment("heartbeat"))
        })
        .take_until(self.shutdown.clone().cancelled_owned());

        let mut response = Sse::new(heartbeats).into_response();
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        response
    }

    async fn handle_post(&self, headers: &HeaderMap, body: Bytes) -> Response {
        let Some(format) = negotiate::negotiate_post(header_str(headers, &header::ACCEPT)) else {
            return not_acceptable(
                "Not Acceptable: client must accept application/json or text/event-stream",
            );
        };

        let message = match std::str::from_utf8(&body)
            .map_err(|e| {
                debug!(error = %e, "Request body is not UTF-8");
                JsonRpcError::parse_error()
            })
            .and_then(JsonRpcClientMessage::from_str)
        {
            Ok(message) => message,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(RpcResponse::from(e))).into_response();
            }
        };

        let mut session_id = header_str(headers, &SESSION_ID_HEADER).map(str::to_string);
        let mut minted_session = false;
        if let JsonRpcClientMessage::Request(request) = &message {
            if request.method == "initialize" && session_id.is_none() {
                session_id = Some(Uuid::now_v7().to_string());
                minted_session = true;
            }
        }

        let context = MethodContext::new(
            header_str(headers, &PROTOCOL_VERSION_HEADER).map(str::to_string),
            session_id.clone(),
        );

        let mut response = match self.server.handle_client_message(context, message).await {
            MessageOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
            MessageOutcome::Rejected(response) => {
                (StatusCode::BAD_REQUEST, Json(response)).into_response()
            }
            MessageOutcome::Response(response) => match format {
                ResponseFormat::Json => (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, negotiate::APPLICATION_JSON)],
                    response.to_json_string(),
                )
                    .into_response(),
                ResponseFormat::EventStream => single_event(&response),
            },
        };

        if minted_session {
            if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
                debug!(session_id = ?value, "Assigned new session id");
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
        }

        response
    }
}

#[instrument(skip_all, fields(%method, session_id = header_str(&headers, &SESSION_ID_HEADER)))]
async fn dispatch<H: JsonRpcHandler>(
    State(transport): State<HttpTransport<H>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut response = match method {
        Method::OPTIONS => preflight(),
        Method::GET => transport.open_event_stream(&headers),
        Method::POST => transport.handle_post(&headers, body).await,
        Method::DELETE => terminate_session(&headers),
        _ => {
            debug!("Method not allowed");
            (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, ALLOWED_METHODS)],
                Json(error_body(format!("Method not allowed: {}", method))),
            )
                .into_response()
        }
    };

    apply_common_headers(&mut response, &headers);
    debug!(status = %response.status(), "Responded");
    response
}

fn preflight() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

fn terminate_session(headers: &HeaderMap) -> Response {
    let session_id = header_str(headers, &SESSION_ID_HEADER);
    info!(session_id, "Session terminated by client");

    (
        StatusCode::OK,
        Json(json!({ "terminated": true, "sessionId": session_id })),
    )
        .into_response()
}

/// Wrap a single response envelope as one SSE `data:` frame.  The body ends after that frame.
fn single_event(response: &RpcResponse) -> Response {
    let event = Event::default().data(response.to_json_string());
    Sse::new(futures::stream::once(async move {
        Ok::<_, Infallible>(event)
    }))
    .into_response()
}

fn not_acceptable(message: &str) -> Response {
    debug!(reason = message, "Content negotiation failed");
    (StatusCode::NOT_ACCEPTABLE, Json(error_body(message))).into_response()
}

/// A JSON-RPC error envelope for failures that happen before any request could be read
fn error_body(message: impl Into<String>) -> Value {
    let response: RpcResponse = JsonRpcError::application(message, Some(Value::Null)).into();
    serde_json::to_value(&response).unwrap_or(Value::Null)
}

/// Headers every response from this endpoint carries: CORS, and the session id echoed back
fn apply_common_headers(response: &mut Response, request_headers: &HeaderMap) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Mcp-Session-Id"),
    );

    if !headers.contains_key(SESSION_ID_HEADER) {
        if let Some(session_id) = request_headers.get(SESSION_ID_HEADER) {
            headers.insert(SESSION_ID_HEADER, session_id.clone());
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Lives as long as one SSE channel, so that the channel's end shows up in the logs whether it
/// was the peer hanging up or the server shutting down.
struct ChannelGuard(Uuid);

impl ChannelGuard {
    fn open() -> Self {
        let id = Uuid::now_v7();
        debug!(channel = %id, "SSE channel opened");
        Self(id)
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        debug!(channel = %self.0, "SSE channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MethodRequest;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl JsonRpcHandler for EchoHandler {
        async fn handle_method(&self, request: MethodRequest) -> Result<Value, JsonRpcError> {
            match request.method() {
                "echo" => Ok(request.params().cloned().unwrap_or(Value::Null)),
                "initialize" => Ok(json!({
                    "protocolVersion": request.context().protocol_version(),
                    "sessionId": request.context().session_id(),
                })),
                other => Err(JsonRpcError::method_not_found(other, request.id().cloned())),
            }
        }
    }

    fn app(shutdown: CancellationToken) -> Router {
        HttpTransport::new(
            JsonRpcServer::new(EchoHandler),
            HttpTransportConfig::default(),
            shutdown,
        )
        .into_router("/mcp")
    }

    fn post(body: &str, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn options_returns_cors_headers() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();
        let response = app(CancellationToken::new()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap();
        assert!(methods.contains("DELETE"));
        let allowed = response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        for name in ["mcp-protocol-version", "mcp-session-id", "accept", "last-event-id"] {
            assert!(allowed.contains(name), "missing {name}");
        }
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn post_malformed_json_is_a_400_parse_error() {
        let response = app(CancellationToken::new())
            .oneshot(post(r#"{"jsonrpc": "2.0", "method": "#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            body,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );
    }

    #[tokio::test]
    async fn post_answers_with_json_by_default() {
        let response = app(CancellationToken::new())
            .oneshot(post(
                r#"{"jsonrpc": "2.0", "id": "a-1", "method": "echo", "params": [1, 2]}"#,
                Some("application/json, text/event-stream"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            negotiate::APPLICATION_JSON
        );
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"jsonrpc": "2.0", "id": "a-1", "result": [1, 2]}));
    }

    #[tokio::test]
    async fn post_preferring_sse_gets_a_single_frame() {
        let response = app(CancellationToken::new())
            .oneshot(post(
                r#"{"jsonrpc": "2.0", "id": 9, "method": "echo", "params": "hi"}"#,
                Some("text/event-stream"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with(negotiate::TEXT_EVENT_STREAM));

        let text = body_text(response).await;
        let frame = text
            .strip_prefix("data:")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .expect("exactly one data frame");
        let body: Value = serde_json::from_str(frame.trim()).unwrap();
        assert_eq!(body, json!({"jsonrpc": "2.0", "id": 9, "result": "hi"}));
    }

    #[tokio::test]
    async fn post_with_unacceptable_accept_is_406() {
        let response = app(CancellationToken::new())
            .oneshot(post(
                r#"{"jsonrpc": "2.0", "id": 1, "method": "echo"}"#,
                Some("text/html"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn post_notification_is_accepted_without_body() {
        let response = app(CancellationToken::new())
            .oneshot(post(
                r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn initialize_mints_a_session_and_sees_the_protocol_header() {
        let mut request = post(r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize"}"#, None);
        request.headers_mut().insert(
            PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static("2025-03-26"),
        );
        let response = app(CancellationToken::new()).oneshot(request).await.unwrap();

        let session_id = response.headers()[SESSION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&session_id).is_ok());

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(body["result"]["sessionId"], session_id);
    }

    #[tokio::test]
    async fn existing_session_is_echoed() {
        let mut request = post(r#"{"jsonrpc": "2.0", "id": 1, "method": "echo"}"#, None);
        request
            .headers_mut()
            .insert(SESSION_ID_HEADER, HeaderValue::from_static("opaque-123"));
        let response = app(CancellationToken::new()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[SESSION_ID_HEADER], "opaque-123");
    }

    #[tokio::test]
    async fn delete_acknowledges_termination() {
        let request = Request::builder()
            .method("DELETE")
            .uri("/mcp")
            .header(SESSION_ID_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        let response = app(CancellationToken::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({"terminated": true, "sessionId": "abc"}));
    }

    #[tokio::test]
    async fn other_verbs_are_405() {
        for method in ["PUT", "PATCH"] {
            let request = Request::builder()
                .method(method)
                .uri("/mcp")
                .body(Body::empty())
                .unwrap();
            let response = app(CancellationToken::new()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn get_without_sse_accept_is_406() {
        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        let response = app(CancellationToken::new()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["code"], -32000);
    }

    #[tokio::test(start_paused = true)]
    async fn get_with_sse_accept_streams_heartbeats_until_shutdown() {
        let shutdown = CancellationToken::new();
        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .header(header::ACCEPT, "text/event-stream")
            .header(LAST_EVENT_ID_HEADER, "41")
            .body(Body::empty())
            .unwrap();
        let response = app(shutdown.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONNECTION], "keep-alive");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let started = tokio::time::Instant::now();
        let mut body = response.into_body().into_data_stream();
        let frame = body.next().await.unwrap().unwrap();
        assert!(frame.starts_with(b":"), "heartbeat is a comment frame");
        assert!(frame.ends_with(b"\n\n"));
        assert!(started.elapsed() >= Duration::from_secs(29));

        shutdown.cancel();
        assert!(body.next().await.is_none());
    }
}
