//! JSON RPC implementation that's specific to JSON RPC servers
use crate::shared as jsonrpc;
use serde_json::Value;
use std::sync::Arc;
use tracing::*;

/// The handler behind a JSON-RPC server.
///
/// Mainly this is responsible for handling incoming method calls and notifications.  The same
/// handler instance serves every transport and every request, concurrently, so any state it holds
/// must be shareable.
#[async_trait::async_trait]
pub trait JsonRpcHandler: Send + Sync + 'static {
    /// Handle a JSON-RPC method invocation
    async fn handle_method(&self, request: MethodRequest) -> Result<Value, jsonrpc::JsonRpcError> {
        // By default, no methods are supported
        warn!("Default trait impl rejects all method invocations.  Implement `handle_method` to override");

        Err(jsonrpc::JsonRpcError::method_not_found(
            request.method(),
            request.id().cloned(),
        ))
    }

    /// Handle a JSON-RPC notification (which is like a method invocation, but no response is
    /// expected).
    ///
    /// Note that this operation is fallible only so that the server implementation can properly
    /// log errors handling notifications.  No error will be returned to the client because
    /// according to the JSON RPC spec servers MUST NOT return any response to notifications
    async fn handle_notification(
        &self,
        request: NotificationRequest,
    ) -> Result<(), jsonrpc::JsonRpcError> {
        debug!(method = request.method(), "Ignoring notification");
        Ok(())
    }
}

/// Context specific to a single JSON RPC method call request.
///
/// Populated by the transport from whatever out-of-band metadata it has; for HTTP that is the
/// request headers, for stdio it is empty.
#[derive(Clone, Debug, Default)]
pub struct MethodContext {
    protocol_version: Option<String>,
    session_id: Option<String>,
}

impl MethodContext {
    pub fn new(protocol_version: Option<String>, session_id: Option<String>) -> Self {
        Self {
            protocol_version,
            session_id,
        }
    }

    /// Protocol version negotiated at the transport level, if any.
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// A request from a client to invoke a method over JSON RPC
#[derive(Clone, Debug)]
pub struct MethodRequest {
    context: MethodContext,
    request: jsonrpc::RpcRequest,
}

impl MethodRequest {
    pub fn new(context: MethodContext, request: jsonrpc::RpcRequest) -> Self {
        Self { context, request }
    }

    pub fn context(&self) -> &MethodContext {
        &self.context
    }

    pub fn id(&self) -> Option<&Value> {
        self.request.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    /// Protocol version stated on the envelope itself, if the client put one there
    pub fn envelope_protocol_version(&self) -> Option<&str> {
        self.request.protocol_version.as_deref()
    }

    pub fn params(&self) -> Option<&Value> {
        self.request.params.as_ref()
    }

    /// Attempt to decode the parameters of the request into a Rust type
    ///
    /// If this fails, a friendly JSON RPC error is produced suitable for returning directly to the
    /// client
    pub fn expect_params<P: serde::de::DeserializeOwned>(&self) -> Result<P, jsonrpc::JsonRpcError> {
        expect_params(self.id(), self.params())
    }
}

/// A notification sent from a client
#[derive(Clone, Debug)]
pub struct NotificationRequest {
    request: jsonrpc::RpcRequest,
}

impl NotificationRequest {
    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.request.params.as_ref()
    }
}

/// What became of a single message handed to [`JsonRpcServer::handle_message`].
#[derive(Clone, Debug)]
pub enum MessageOutcome {
    /// The message was a request; here is the response envelope (success or error)
    Response(jsonrpc::RpcResponse),

    /// The message was a notification; per the JSON-RPC spec nothing may be sent back
    Accepted,

    /// The message could not be decoded at all
    Rejected(jsonrpc::RpcResponse),
}

/// JSON RPC server which implements the JSON RPC-specific plumbing, then invokes some
/// [`JsonRpcHandler`] trait impl to do the actual logic.
///
/// Cheap to clone; all clones share the same handler.
pub struct JsonRpcServer<H> {
    handler: Arc<H>,
}

impl<H> Clone for JsonRpcServer<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H> std::fmt::Debug for JsonRpcServer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcServer")
            .field("handler", &std::any::type_name::<H>())
            .finish()
    }
}

impl<H> JsonRpcServer<H>
where
    H: JsonRpcHandler,
{
    pub fn new(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<H>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Handle one message, returning the typed outcome so that the transport can decide how to
    /// frame it.
    pub async fn handle_message(&self, context: MethodContext, message: &str) -> MessageOutcome {
        match jsonrpc::JsonRpcClientMessage::from_str(message) {
            Ok(message) => self.handle_client_message(context, message).await,
            Err(e) => MessageOutcome::Rejected(e.into()),
        }
    }

    /// Handle a message the transport has already decoded, for transports that need to look at
    /// the envelope before dispatching it.
    pub async fn handle_client_message(
        &self,
        context: MethodContext,
        message: jsonrpc::JsonRpcClientMessage,
    ) -> MessageOutcome {
        match message {
            jsonrpc::JsonRpcClientMessage::Request(request) => {
                let id = request.id.clone();
                let response = match self.handle_method(MethodRequest::new(context, request)).await
                {
                    // Wrap it in the standard JSON-RPC response
                    Ok(result) => jsonrpc::RpcResponse::success(id, result),
                    // The envelope always answers the request, whatever id the handler recorded
                    Err(e) => e.with_id(id).into(),
                };
                MessageOutcome::Response(response)
            }
            jsonrpc::JsonRpcClientMessage::Notification(request) => {
                // Notifications don't get responses.  however the notification handler is
                // fallible, if it fails we want to log that fact.
                self.handle_notification(NotificationRequest { request })
                    .await;
                MessageOutcome::Accepted
            }
        }
    }

    /// Handle a JSON RPC request represented as a JSON string.
    ///
    /// Returns the serialized response, or `None` if the message was a notification.
    pub async fn handle_request(&self, context: MethodContext, request: &str) -> Option<String> {
        match self.handle_message(context, request).await {
            MessageOutcome::Response(response) | MessageOutcome::Rejected(response) => {
                Some(response.to_json_string())
            }
            MessageOutcome::Accepted => None,
        }
    }

    #[instrument(skip_all, fields(method = %request.method(), id = ?request.id()))]
    async fn handle_method(&self, request: MethodRequest) -> Result<Value, jsonrpc::JsonRpcError> {
        self.handler.handle_method(request).await.inspect_err(|e| {
            debug!(error = %e, "Method invocation failed");
        })
    }

    #[instrument(skip_all, fields(method = %request.method()))]
    async fn handle_notification(&self, request: NotificationRequest) {
        if let Err(e) = self.handler.handle_notification(request).await {
            error!(error = %e, "Error handling notification");
        }
    }
}

/// Helper for RPC server impls to concisely serialize their method responses to JSON
pub fn json_response<T: serde::Serialize>(
    id: Option<&Value>,
    response: &T,
) -> Result<Value, jsonrpc::JsonRpcError> {
    serde_json::to_value(response).map_err(|e| {
        jsonrpc::JsonRpcError::from_error(jsonrpc::ErrorCode::InternalError, &e, id.cloned())
    })
}

/// Helper for RPC server impls to deserialize their expected parameters struct from the JSON
/// request.  Properly handles error reporting.
///
/// # Note
///
/// Calling this function assumes that the request is expected to have `params`.  If `params` are
/// missing, this will report an error.  If your request doesn't expect params, then do not call
/// this method.
pub fn expect_params<P: serde::de::DeserializeOwned>(
    id: Option<&Value>,
    params: Option<&Value>,
) -> Result<P, jsonrpc::JsonRpcError> {
    let params = params.ok_or_else(|| {
        debug!("Expected params in request, but none were provided");
        jsonrpc::JsonRpcError::invalid_params("missing params", id.cloned())
    })?;
    P::deserialize(params).map_err(|e| {
        debug!(error = %e, %params, "Error deserializing params");
        jsonrpc::JsonRpcError::invalid_params(e, id.cloned())
    })
}
