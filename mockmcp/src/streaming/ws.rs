//! The WebSocket side of the streaming channel: one session per socket, bridging frames to and
//! from the [`ConnectionRegistry`].
use super::message::ControlError;
use super::registry::{ConnectionRegistry, Registration};
use super::ServerMessage;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::*;

/// How long a session waits for the closing handshake before giving up on the socket
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// axum handler for the streaming endpoint
pub async fn upgrade(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(registry): State<ConnectionRegistry>,
) -> Response {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    debug!(?remote, "Upgrading to WebSocket");

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        run_session(registry, remote, sink, stream).await
    })
}

/// Serve one connection until either side hangs up.
///
/// Text frames from the client are control messages; everything the registry queues for this
/// connection is written back as text frames.  When the session ends, for whatever reason, the
/// connection and all its streams are removed from the registry before the socket is closed, so a
/// peer that never finishes the closing handshake can't keep streams alive.
pub async fn run_session<Tx, Rx, E>(
    registry: ConnectionRegistry,
    remote: Option<SocketAddr>,
    mut sink: Tx,
    mut stream: Rx,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let Registration { id, mut outbound } = match registry.register(remote) {
        Ok(registration) => registration,
        Err(e) => {
            info!(?remote, error = %e, "Connection refused");
            let goodbye = sink.send(close_message(&e.to_string()));
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await;
            return;
        }
    };

    let span = info_span!("ws_session", connection_id = %id, ?remote);
    async {
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => registry.dispatch(id, &text),
                    Some(Ok(Message::Binary(_))) => {
                        registry.send(id, ServerMessage::error(ControlError::Binary));
                    }
                    // The WebSocket implementation answers pings on its own
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Client closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Socket error");
                        break;
                    }
                    None => {
                        debug!("Socket ended without a close frame");
                        break;
                    }
                },
                message = outbound.recv() => match message {
                    Some(message) => {
                        let text = match message.to_json_string() {
                            Ok(text) => text,
                            Err(e) => {
                                error!(error = %e, "Failed to serialize outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(error = %e, "Failed to write to socket");
                            break;
                        }
                    }
                    None => {
                        // Only happens when the registry drops the connection, i.e. on shutdown
                        debug!("Registry closed the connection");
                        let _ = sink.send(close_message("Server shutting down")).await;
                        break;
                    }
                }
            }
        }

        registry.unregister(id);
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "Error closing socket"),
            Err(_) => debug!("Peer never finished closing; abandoning socket"),
        }
    }
    .instrument(span)
    .await
}

fn close_message(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: reason.to_string().into(),
    }))
}
