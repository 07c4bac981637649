//! Push-based streaming over a persistent WebSocket channel.
//!
//! Clients connect, start any number of synthetic data streams, and receive every event those
//! streams generate until they stop them or hang up.  The pieces, leaves first:
//!
//! - [`StreamKind`] and the payload generators for each kind
//! - [`StreamHandle`], a cancellable lazy sequence of events, and [`StreamScheduler`], which paces
//!   those sequences on tokio tasks
//! - [`ConnectionRegistry`], which owns connections and their streams and routes events
//! - [`ws`], which bridges WebSocket frames to the registry
mod connection;
mod generator;
mod kind;
mod message;
mod outbound;
mod registry;
mod scheduler;
pub mod ws;

pub use connection::{ConnectionInfo, ConnectionState, InvalidTransition};
pub use generator::EventGenerator;
pub use kind::StreamKind;
pub use message::{
    ClientMessage, ConnectionId, ControlError, OutboundMessage, ServerMessage, StreamConfig,
    StreamEvent, StreamId, MIN_INTERVAL,
};
pub use outbound::OutboundReceiver;
pub use registry::{ConnectionRegistry, Registration, RegistryConfig, StreamError};
pub use scheduler::{EventSink, StreamHandle, StreamScheduler};
