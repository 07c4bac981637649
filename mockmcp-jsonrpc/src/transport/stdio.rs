//! Implementation of the so-called "stdio" transport, which is another way of saying a transport
//! in which the entire process is handling a single client connection, with client requests coming
//! in on stdin, responses going out on stdout, and log events (if any) usually logged to stderr.
//!
//! This is described in the MCP spec at <https://spec.modelcontextprotocol.io/specification/basic/transports/#stdio>
use super::stream::StreamTransport;
use crate::server::{JsonRpcHandler, JsonRpcServer};
use anyhow::Result;
use tokio::io::{BufReader, Stdin, Stdout};
use tokio_util::sync::CancellationToken;

pub struct StdioTransport<H> {
    inner: StreamTransport<BufReader<Stdin>, Stdout, H>,
}

impl<H: JsonRpcHandler> StdioTransport<H> {
    pub fn new(server: JsonRpcServer<H>) -> Self {
        Self {
            inner: StreamTransport::new(
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                server,
            ),
        }
    }

    /// Serve requests from stdin until it is closed or `cancellation_token` fires.
    pub async fn serve(mut self, cancellation_token: CancellationToken) -> Result<()> {
        self.inner.serve(cancellation_token).await
    }
}
