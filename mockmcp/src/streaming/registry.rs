//! The connection registry: every live streaming connection, the streams each one owns, and the
//! routing of generated events back to the connection that asked for them.
//!
//! All state sits behind one mutex.  Every control message is handled in a single critical
//! section, and event delivery re-checks that its stream is still registered under that same
//! lock, which is what guarantees a stopped stream never emits after its `stream_stopped`.
use super::connection::{Connection, ConnectionInfo, ConnectionState, StreamEntry};
use super::kind::StreamKind;
use super::message::{ClientMessage, ConnectionId, ServerMessage, StreamEvent};
use super::outbound::{self, EventQueued, OutboundReceiver};
use super::scheduler::{EventSink, StreamHandle, StreamScheduler};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::*;
use uuid::Uuid;

/// Runtime-configurable settings for the registry
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Events that may wait unread in one connection's outbound queue.  Events generated while
    /// that many are waiting are dropped.  Control replies are always queued.
    pub outbound_capacity: usize,

    /// Seed for every stream's random data, for reproducible runs.  Random when `None`.
    pub seed: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            seed: None,
        }
    }
}

/// Failures of stream operations, reported to the client in-band
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("Unknown stream type: {0}")]
    UnknownKind(String),

    /// Also what a client gets when naming a stream that belongs to another connection
    #[error("Stream not found: {0}")]
    UnknownStream(String),

    #[error("Server is shutting down")]
    ShuttingDown,
}

/// A newly registered connection: its id, and the queue of messages to write to it
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    pub outbound: OutboundReceiver,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    scheduler: StreamScheduler,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    /// Source of per-stream generator seeds
    seeds: StdRng,
    shutting_down: bool,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.inner.config)
            .field("running_streams", &self.running_streams())
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let seeds = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            inner: Arc::new(RegistryInner {
                config,
                scheduler: StreamScheduler::new(),
                state: Mutex::new(RegistryState {
                    connections: HashMap::new(),
                    seeds,
                    shutting_down: false,
                }),
            }),
        }
    }

    /// Start tracking a new connection and queue its welcome message
    pub fn register(&self, remote: Option<SocketAddr>) -> Result<Registration, StreamError> {
        let (sender, receiver) = outbound::channel(self.inner.config.outbound_capacity);
        let id = Uuid::now_v7();

        let mut state = self.lock();
        if state.shutting_down {
            debug!(?remote, "Refusing connection during shutdown");
            return Err(StreamError::ShuttingDown);
        }

        let mut connection = Connection::new(id, remote, sender);
        push(
            &connection,
            ServerMessage::Connection {
                client_id: id,
                available_streams: StreamKind::all(),
                timestamp: Utc::now(),
            },
        );
        connection.advance(ConnectionState::Open);
        state.connections.insert(id, connection);

        info!(connection_id = %id, ?remote, connections = state.connections.len(), "Connection registered");

        Ok(Registration {
            id,
            outbound: receiver,
        })
    }

    /// Handle one text frame from a client.  Whatever happens, the client hears about it on its
    /// own outbound queue; nothing is returned to the caller.
    #[instrument(skip_all, fields(%connection_id))]
    pub fn dispatch(&self, connection_id: ConnectionId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(connection_id, message),
            Err(e) => {
                debug!(error = %e, "Rejecting control message");
                self.send(connection_id, ServerMessage::error(e));
            }
        }
    }

    /// Handle an already-decoded control message
    pub fn handle(&self, connection_id: ConnectionId, message: ClientMessage) {
        let mut state = self.lock();
        let RegistryState {
            connections, seeds, ..
        } = &mut *state;

        let Some(connection) = connections.get_mut(&connection_id) else {
            debug!(%connection_id, "Control message for a connection that is gone");
            return;
        };
        if !connection.state.accepts_messages() {
            debug!(%connection_id, state = %connection.state, "Ignoring control message");
            return;
        }

        let reply = match message {
            ClientMessage::Subscribe { stream } => {
                connection.subscriptions.insert(stream.clone());
                ServerMessage::Subscribed { stream }
            }
            ClientMessage::Unsubscribe { stream } => {
                connection.subscriptions.remove(&stream);
                ServerMessage::Unsubscribed { stream }
            }
            ClientMessage::StartStream {
                stream_type,
                config,
            } => match StreamKind::from_str(&stream_type) {
                Ok(kind) => {
                    let config = config.unwrap_or_default().resolved(kind);
                    let stream_id = Uuid::now_v7();
                    let cancel = self.inner.scheduler.stream_token();
                    let handle = StreamHandle::new(
                        stream_id,
                        connection_id,
                        kind,
                        &config,
                        seeds.gen(),
                        cancel.clone(),
                    );

                    connection
                        .streams
                        .insert(stream_id, StreamEntry { kind, cancel });
                    // The driver can't deliver anything until this lock is released, so the
                    // acknowledgement queued below always precedes the first event
                    self.inner.scheduler.spawn(
                        handle,
                        RegistrySink {
                            registry: self.clone(),
                            connection_id,
                        },
                    );
                    info!(%connection_id, %stream_id, %kind, interval_ms = config.interval, "Stream started");

                    ServerMessage::StreamStarted {
                        stream_id,
                        stream_type: kind,
                        config,
                    }
                }
                Err(_) => {
                    debug!(%connection_id, %stream_type, "Unknown stream type");
                    ServerMessage::error(StreamError::UnknownKind(stream_type))
                }
            },
            ClientMessage::StopStream { stream_id } => {
                let entry = Uuid::parse_str(&stream_id).ok().and_then(|id| {
                    connection
                        .streams
                        .remove(&id)
                        .map(|entry| (id, entry))
                });
                match entry {
                    Some((stream_id, entry)) => {
                        entry.cancel.cancel();
                        info!(%connection_id, %stream_id, kind = %entry.kind, "Stream stopped");
                        ServerMessage::StreamStopped {
                            stream_id,
                            stream_type: entry.kind,
                        }
                    }
                    None => {
                        debug!(%connection_id, %stream_id, "Stop requested for a stream this connection doesn't own");
                        ServerMessage::error(StreamError::UnknownStream(stream_id))
                    }
                }
            }
            ClientMessage::Ping => ServerMessage::pong(),
        };

        push(connection, reply);
    }

    /// Route one generated event to its connection.
    ///
    /// Returns `false` if the stream is no longer registered or the connection is gone, which
    /// tells the stream to stop.  An event that finds too many events already waiting is dropped,
    /// but the stream carries on.
    pub fn deliver(&self, connection_id: ConnectionId, event: StreamEvent) -> bool {
        let state = self.lock();
        let Some(connection) = state.connections.get(&connection_id) else {
            return false;
        };
        if !connection.streams.contains_key(&event.stream_id) {
            return false;
        }

        match connection.outbound.send_event(event) {
            EventQueued::Queued => true,
            EventQueued::Dropped => {
                warn!(%connection_id, "Client is falling behind; dropping event");
                true
            }
            EventQueued::Closed => false,
        }
    }

    /// Forget a connection, cancelling every stream it owns.
    ///
    /// Returns `false` if there was nothing to forget, which is not an error: the connection may
    /// already be gone.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.lock();
        let Some(mut connection) = state.connections.remove(&connection_id) else {
            return false;
        };

        if connection.state == ConnectionState::Open {
            connection.advance(ConnectionState::Closing);
        }
        let streams = connection.cancel_streams();
        connection.advance(ConnectionState::Closed);

        let lifetime = Utc::now() - connection.created_at;
        info!(
            %connection_id,
            streams,
            lifetime_ms = lifetime.num_milliseconds(),
            connections = state.connections.len(),
            "Connection unregistered"
        );
        true
    }

    /// Send a message to every open connection subscribed to `topic`, or to every open connection
    /// when there is no topic.  Returns how many connections it was queued for.
    pub fn broadcast(&self, message: ServerMessage, topic: Option<&str>) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for connection in state.connections.values() {
            if !connection.state.accepts_messages() {
                continue;
            }
            let subscribed = topic.map_or(true, |topic| connection.subscriptions.contains(topic));
            if subscribed && push(connection, message.clone()) {
                delivered += 1;
            }
        }

        debug!(?topic, delivered, "Broadcast");
        delivered
    }

    /// Tell every client the server is going away, stop every stream, and drop every connection.
    ///
    /// Dropping a connection closes its outbound queue once the messages already in it have been
    /// read, which is how the sessions find out they are done.  New connections are refused from
    /// here on.
    pub fn shutdown(&self, message: &str) {
        let mut state = self.lock();
        state.shutting_down = true;

        let count = state.connections.len();
        for (_, mut connection) in state.connections.drain() {
            push(
                &connection,
                ServerMessage::ServerShutdown {
                    message: message.to_string(),
                },
            );
            if connection.state == ConnectionState::Open {
                connection.advance(ConnectionState::Closing);
            }
            connection.cancel_streams();
            connection.advance(ConnectionState::Closed);
        }
        drop(state);

        self.inner.scheduler.shutdown();
        info!(connections = count, "Registry shut down");
    }

    /// Wait for every stream task to exit.  Only completes after [`Self::shutdown`].
    pub async fn wait_for_streams(&self) {
        self.inner.scheduler.wait().await
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of streams registered across all connections
    pub fn stream_count(&self) -> usize {
        self.lock()
            .connections
            .values()
            .map(|c| c.streams.len())
            .sum()
    }

    /// Number of stream tasks still running, which may briefly exceed [`Self::stream_count`] while
    /// cancelled streams wind down
    pub fn running_streams(&self) -> usize {
        self.inner.scheduler.active()
    }

    pub fn connection_info(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        self.lock()
            .connections
            .get(&connection_id)
            .map(ConnectionInfo::from)
    }

    /// Queue a message for one connection.  Returns whether it was queued.
    pub fn send(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        match self.lock().connections.get(&connection_id) {
            Some(connection) => push(connection, message),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap()
    }
}

/// Queue a control message for a connection.  Returns whether it was queued, which only fails
/// once nobody is reading the queue.
fn push(connection: &Connection, message: ServerMessage) -> bool {
    let queued = connection.outbound.send_control(message);
    if !queued {
        debug!(connection_id = %connection.id, "Outbound queue closed; dropping message");
    }
    queued
}

/// Feeds one stream's events back through the registry
struct RegistrySink {
    registry: ConnectionRegistry,
    connection_id: ConnectionId,
}

impl EventSink for RegistrySink {
    fn deliver(&self, event: StreamEvent) -> bool {
        self.registry.deliver(self.connection_id, event)
    }
}
