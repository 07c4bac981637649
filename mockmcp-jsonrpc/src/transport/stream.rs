//! Defines a JSON RPC transport that communicates with a client over two async streams, one for
//! reading and one for writing, with one JSON-RPC message per line in each direction.
//!
//! This is used to implement the stdio transport, and is also useful for tests that simulate a
//! client and server talking over a pipe.

use crate::server::{JsonRpcHandler, JsonRpcServer, MethodContext};
use anyhow::Result;
use futures::StreamExt;
use std::fmt::{Debug, Formatter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::*;

pub struct StreamTransport<R, W, H> {
    reader: R,
    writer: W,
    server: JsonRpcServer<H>,
}

impl<R, W, H> Debug for StreamTransport<R, W, H>
where
    R: Debug,
    W: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("server", &self.server)
            .finish()
    }
}

impl<R, W, H> StreamTransport<R, W, H>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    H: JsonRpcHandler,
{
    pub fn new(reader: R, writer: W, server: JsonRpcServer<H>) -> Self {
        Self {
            reader,
            writer,
            server,
        }
    }

    /// Start serving the JSON RPC service over this transport.
    ///
    /// Stops when the cancellation token is triggered, or the reader stream ends.  Requests still
    /// in flight when the reader hits EOF are finished and answered first.
    pub async fn serve(&mut self, cancellation_token: CancellationToken) -> Result<()> {
        // There is only ever one client on a stream, and it has no headers to speak of
        let context = MethodContext::default();
        let mut pending_requests = futures::stream::FuturesUnordered::new();
        let mut reader_done = false;

        // Kept across iterations: when another branch wins the select, whatever part of a line was
        // already read stays here and the next `read_line` appends to it
        let mut line = String::new();

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    debug!("Cancellation requested; aborting");
                    return Ok(());
                },
                result = self.reader.read_line(&mut line), if !reader_done => {
                    if result? == 0 {
                        debug!("EOF on reader; draining pending requests");
                        reader_done = true;
                    } else if line.trim().is_empty() {
                        trace!("Skipping blank line");
                        line.clear();
                    } else {
                        let line = std::mem::take(&mut line);
                        // Requests are processed concurrently; responses go out in completion
                        // order, which JSON-RPC permits because they carry the request id
                        let server = self.server.clone();
                        let context = context.clone();
                        pending_requests.push(async move {
                            server.handle_request(context, &line).await
                        });
                    }
                },
                Some(response) = pending_requests.next(), if !pending_requests.is_empty() => {
                    // `None` means the message was a notification, which gets no response
                    if let Some(response) = response {
                        self.writer.write_all(response.as_bytes()).await?;
                        self.writer.write_all(b"\n").await?;
                        self.writer.flush().await?;
                    }
                }
            }

            if reader_done && pending_requests.is_empty() {
                debug!("Reader closed and all requests answered; stopping stream");
                return Ok(());
            }
        }
    }
}
