pub mod mcp;
pub mod server;
pub mod streaming;
mod error;

pub use error::Result;

#[cfg(test)]
pub(crate) use mockmcp_jsonrpc::test_helpers;
