//! Per-connection bookkeeping held by the registry.
use super::kind::StreamKind;
use super::message::{ConnectionId, StreamId};
use super::outbound::OutboundSender;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Lifecycle of a persistent connection.  `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid connection state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Move to `to`, if that is a legal next state
    pub fn transition(self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;

        match (self, to) {
            (Connecting, Open) | (Connecting, Closed) | (Open, Closing) | (Open, Closed)
            | (Closing, Closed) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    pub fn accepts_messages(self) -> bool {
        self == ConnectionState::Open
    }
}

/// A stream as the registry tracks it: enough to stop it and describe it
#[derive(Debug)]
pub(crate) struct StreamEntry {
    pub(crate) kind: StreamKind,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) remote: Option<SocketAddr>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) state: ConnectionState,
    pub(crate) subscriptions: HashSet<String>,
    pub(crate) streams: HashMap<StreamId, StreamEntry>,
    pub(crate) outbound: OutboundSender,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        remote: Option<SocketAddr>,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            id,
            remote,
            created_at: Utc::now(),
            state: ConnectionState::Connecting,
            subscriptions: HashSet::new(),
            streams: HashMap::new(),
            outbound,
        }
    }

    /// Move the connection's lifecycle forward.  Illegal moves are logged and ignored.
    pub(crate) fn advance(&mut self, to: ConnectionState) -> bool {
        match self.state.transition(to) {
            Ok(state) => {
                self.state = state;
                true
            }
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Ignoring state change");
                false
            }
        }
    }

    /// Cancel every stream this connection owns
    pub(crate) fn cancel_streams(&mut self) -> usize {
        let count = self.streams.len();
        for (_, stream) in self.streams.drain() {
            stream.cancel.cancel();
        }
        count
    }
}

/// Point-in-time view of a connection, for diagnostics and tests
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote: Option<SocketAddr>,
    pub created_at: DateTime<Utc>,
    pub state: ConnectionState,
    pub subscriptions: Vec<String>,
    pub streams: Vec<(StreamId, StreamKind)>,
}

impl From<&Connection> for ConnectionInfo {
    fn from(connection: &Connection) -> Self {
        let mut subscriptions: Vec<_> = connection.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        let mut streams: Vec<_> = connection
            .streams
            .iter()
            .map(|(id, stream)| (*id, stream.kind))
            .collect();
        streams.sort_by_key(|(id, _)| *id);

        Self {
            id: connection.id,
            remote: connection.remote,
            created_at: connection.created_at,
            state: connection.state,
            subscriptions,
            streams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use super::ConnectionState::*;

    #[test]
    fn legal_lifecycle() {
        let state = Connecting.transition(Open).unwrap();
        let state = state.transition(Closing).unwrap();
        assert_eq!(state.transition(Closed), Ok(Closed));
        assert_eq!(Connecting.transition(Closed), Ok(Closed));
        assert!(Open.accepts_messages());
        assert!(!Closing.accepts_messages());
    }

    #[test]
    fn nothing_leaves_closed() {
        for to in [Connecting, Open, Closing, Closed] {
            assert_matches!(
                Closed.transition(to),
                Err(InvalidTransition { from: Closed, .. })
            );
        }
    }

    #[test]
    fn no_going_back() {
        assert!(Open.transition(Connecting).is_err());
        assert!(Closing.transition(Open).is_err());
        assert!(Connecting.transition(Closing).is_err());
    }
}
