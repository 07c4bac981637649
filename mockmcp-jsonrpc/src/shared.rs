//! JSON-RPC wire types shared by the server and every transport.
//!
//! Error codes and the error object come from `jsonrpsee-types`.  The request envelope is our own,
//! because MCP clients are not consistent about sending the `jsonrpc` member and ids can be any
//! JSON value, neither of which `jsonrpsee_types::Request` tolerates.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::*;

pub use jsonrpsee_types::{ErrorCode, ErrorObjectOwned, TwoPointZero};

/// Error code for failures raised by the application behind a method, as opposed to failures of
/// the protocol itself.
pub const APPLICATION_ERROR_CODE: i32 = -32000;

/// A request envelope as received from a client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,

    /// Some clients put the protocol version on the envelope itself rather than in the
    /// `initialize` params.
    #[serde(default)]
    pub protocol_version: Option<String>,

    /// `None` if the member was absent, `Some(Value::Null)` if the client sent an explicit `null`.
    /// The distinction matters because the id is echoed back exactly as it was received.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default)]
    pub params: Option<Value>,
}

/// Possible kinds of message from JSON-RPC clients
#[derive(Clone, Debug, PartialEq)]
pub enum JsonRpcClientMessage {
    /// A regular method invocation, which always gets a response
    Request(RpcRequest),

    /// A notification, which is fire-and-forget and does not elicit a response
    Notification(RpcRequest),
}

impl JsonRpcClientMessage {
    /// Parse a single message.
    ///
    /// Anything that isn't a JSON object with at least a string `method` is a parse error.  Batches
    /// are not supported.
    pub fn from_str(message: &str) -> Result<Self, JsonRpcError> {
        let request: RpcRequest = serde_json::from_str(message).map_err(|e| {
            debug!(error = %e, "Rejecting message that is not a JSON-RPC envelope");
            JsonRpcError::parse_error()
        })?;

        // A missing id only makes something a notification when the method is one; plain requests
        // that forgot their id still get an (id-less) answer.
        if request.id.is_none() && request.method.starts_with("notifications/") {
            Ok(Self::Notification(request))
        } else {
            Ok(Self::Request(request))
        }
    }
}

/// The response envelope sent back to clients.
#[derive(Clone, Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: TwoPointZero,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub payload: RpcPayload,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcPayload {
    Result(Value),
    Error(ErrorObjectOwned),
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            id,
            payload: RpcPayload::Result(result),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, RpcPayload::Error(_))
    }

    /// Serialize to a JSON string.
    ///
    /// Responses are built only from `Value`s and strings so this can't really fail, but if it
    /// somehow does the client still gets something that parses.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize JSON-RPC response");
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"Internal error"}}}}"#,
                ErrorCode::InternalError.code()
            )
        })
    }
}

/// Error type that captures failures as JSON-RPC errors
///
/// Carries enough detail to produce a proper JSON error response, including the id of the request
/// that caused it.
#[derive(Clone, Debug)]
pub struct JsonRpcError {
    code: ErrorCode,
    message: String,
    id: Option<Value>,
    data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>, id: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            id,
            data: None,
        }
    }

    /// Make a new JSON RPC error, capturing the source error chain in the `data` field
    pub fn from_error(code: ErrorCode, error: &dyn std::error::Error, id: Option<Value>) -> Self {
        let message = error.to_string();
        let mut inner = error.source();
        let mut chain = vec![];
        while let Some(e) = inner {
            chain.push(Value::String(e.to_string()));
            inner = e.source();
        }

        let mut me = Self::new(code, message, id);
        if !chain.is_empty() {
            me.data = Some(Value::Array(chain));
        }
        me
    }

    /// The body could not be decoded as a JSON-RPC envelope.  There is no usable id in that case,
    /// so it is reported as `null`.
    pub fn parse_error() -> Self {
        Self::new(
            ErrorCode::ParseError,
            ErrorCode::ParseError.message(),
            Some(Value::Null),
        )
    }

    pub fn invalid_request(id: Option<Value>) -> Self {
        Self::new(
            ErrorCode::InvalidRequest,
            ErrorCode::InvalidRequest.message(),
            id,
        )
    }

    pub fn method_not_found(method: &str, id: Option<Value>) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
            id,
        )
    }

    pub fn invalid_params(detail: impl std::fmt::Display, id: Option<Value>) -> Self {
        Self::new(
            ErrorCode::InvalidParams,
            format!("{}: {}", ErrorCode::InvalidParams.message(), detail),
            id,
        )
    }

    /// A failure of the application behind the method.  The message is passed to the client as-is.
    pub fn application(message: impl Into<String>, id: Option<Value>) -> Self {
        Self::new(ErrorCode::ServerError(APPLICATION_ERROR_CODE), message, id)
    }

    pub fn internal_anyhow_error(error: anyhow::Error, id: Option<Value>) -> Self {
        Self::new(ErrorCode::InternalError, format!("{:#}", error), id)
    }

    /// Replace the id, e.g. with the id of the request that is being answered
    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }

    pub fn code(&self) -> i32 {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for JsonRpcError {}

impl From<JsonRpcError> for RpcResponse {
    fn from(error: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            id,
            data,
        } = error;

        RpcResponse {
            jsonrpc: TwoPointZero,
            id,
            payload: RpcPayload::Error(ErrorObjectOwned::owned(code.code(), message, data)),
        }
    }
}

/// Deserialize a field that is known to be present (serde only calls this when the key exists), so
/// an explicit `null` becomes `Some(Value::Null)` rather than collapsing into `None`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
