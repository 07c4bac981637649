//! The two narrow interfaces the MCP method router uses to reach the tools it exposes.
use serde::Serialize;
use serde_json::{Map, Value};

/// Describes one tool, as reported by `tools/list`
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the `arguments` object the tool accepts
    pub input_schema: Value,
}

/// Source of the tool descriptors advertised to clients
pub trait ToolCatalog: Send + Sync + 'static {
    /// Every tool, in a stable order.  Calling this twice without an intervening mutation of the
    /// catalog yields identical results.
    fn list_tools(&self) -> Vec<ToolDescriptor>;
}

/// Runs tools by name
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>)
        -> Result<Value, ToolError>;
}

/// Ways a tool invocation can fail.  The `Display` form is what the client sees.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument '{name}': expected {expected}")]
    InvalidArgument { name: String, expected: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: u64 },

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: u64,
        requested: u64,
        available: u64,
    },
}
