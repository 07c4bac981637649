//! Tiny Model Context Protocol server: the method router that sits behind the JSON-RPC
//! transports, plus the mock tools it exposes.
//!
//! Uses [`mockmcp_jsonrpc`] for the underlying JSON RPC protocol.
mod catalog;
mod store;
mod tools;

pub use catalog::{ToolCatalog, ToolDescriptor, ToolError, ToolExecutor};
pub use store::DataStore;
pub use tools::MockToolbox;

use mockmcp_jsonrpc::{
    expect_params, json_response, JsonRpcError, JsonRpcHandler, MethodRequest, NotificationRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use strum::EnumString;
use tracing::*;

/// Protocol version reported by `initialize` when the client doesn't ask for one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// The RPC methods this server understands.  Anything else lands in `Unknown`.
#[derive(Clone, Debug, PartialEq, Eq, EnumString)]
enum RpcMethod {
    #[strum(serialize = "initialize")]
    Initialize,
    #[strum(serialize = "tools/list")]
    ToolsList,
    #[strum(serialize = "tools/call")]
    ToolsCall,
    #[strum(serialize = "ping")]
    Ping,
    #[strum(default)]
    Unknown(String),
}

impl RpcMethod {
    fn parse(method: &str) -> Self {
        Self::from_str(method).unwrap_or_else(|_| Self::Unknown(method.to_string()))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult<'a> {
    protocol_version: &'a str,
    capabilities: Value,
    server_info: &'a ServerInfo,
}

#[derive(Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Routes MCP methods to a tool catalog and executor.
///
/// The same instance serves every transport.
pub struct McpService<T> {
    tools: Arc<T>,
    server_info: ServerInfo,
}

impl<T> McpService<T>
where
    T: ToolCatalog + ToolExecutor,
{
    pub fn new(tools: Arc<T>) -> Self {
        Self {
            tools,
            server_info: ServerInfo::default(),
        }
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    /// Protocol version negotiation: the `Mcp-Protocol-Version` header wins, then a version on
    /// the envelope itself, then the one in the params, then our default.
    fn initialize(&self, request: &MethodRequest) -> Result<Value, JsonRpcError> {
        let protocol_version = request
            .context()
            .protocol_version()
            .or_else(|| request.envelope_protocol_version())
            .or_else(|| {
                request
                    .params()
                    .and_then(|params| params.get("protocolVersion"))
                    .and_then(Value::as_str)
            })
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        info!(protocol_version, session_id = request.context().session_id(), "Client initializing");

        json_response(
            request.id(),
            &InitializeResult {
                protocol_version,
                capabilities: json!({ "tools": { "listChanged": true } }),
                server_info: &self.server_info,
            },
        )
    }

    fn list_tools(&self, request: &MethodRequest) -> Result<Value, JsonRpcError> {
        json_response(request.id(), &json!({ "tools": self.tools.list_tools() }))
    }

    async fn call_tool(&self, request: &MethodRequest) -> Result<Value, JsonRpcError> {
        let id = request.id();
        let params: CallToolParams = expect_params(id, request.params())?;

        let arguments = match params.arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments,
            Some(_) => {
                return Err(JsonRpcError::invalid_params(
                    "arguments must be an object",
                    id.cloned(),
                ))
            }
        };

        let result = self
            .tools
            .call_tool(&params.name, arguments)
            .await
            .map_err(|e| JsonRpcError::application(e.to_string(), id.cloned()))?;

        let text = serde_json::to_string_pretty(&result).map_err(|e| {
            JsonRpcError::from_error(mockmcp_jsonrpc::ErrorCode::InternalError, &e, id.cloned())
        })?;

        Ok(json!({ "content": [{ "type": "text", "text": text }] }))
    }
}

#[async_trait::async_trait]
impl<T> JsonRpcHandler for McpService<T>
where
    T: ToolCatalog + ToolExecutor,
{
    async fn handle_method(&self, request: MethodRequest) -> Result<Value, JsonRpcError> {
        match RpcMethod::parse(request.method()) {
            RpcMethod::Initialize => self.initialize(&request),
            RpcMethod::ToolsList => self.list_tools(&request),
            RpcMethod::ToolsCall => self.call_tool(&request).await,
            RpcMethod::Ping => Ok(json!({})),
            RpcMethod::Unknown(method) => {
                debug!(%method, "Unknown method");
                Err(JsonRpcError::method_not_found(&method, request.id().cloned()))
            }
        }
    }

    async fn handle_notification(&self, request: NotificationRequest) -> Result<(), JsonRpcError> {
        match request.method() {
            "notifications/initialized" => info!("Client finished initialization"),
            "notifications/cancelled" => debug!(params = ?request.params(), "Client cancelled a request"),
            method => debug!(method, "Ignoring notification"),
        }
        Ok(())
    }
}
