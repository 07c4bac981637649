//! Defines the transport layer for the JSON-RPC server.
//!
//! Transports are what expose a JSON-RPC service to clients over some transport mechanism.

mod http_sse;
pub mod negotiate;
mod stdio;
mod stream;

pub use http_sse::{
    HttpTransport, HttpTransportConfig, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER,
    SESSION_ID_HEADER,
};
pub use stdio::StdioTransport;
pub use stream::StreamTransport;
