//! Messages exchanged over the persistent streaming channel.
//!
//! Every message in either direction is a JSON object whose `type` member says what it is.
use super::kind::StreamKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use strum::EnumString;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type StreamId = Uuid;

/// Streams never run faster than this, whatever the client asks for
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Client-supplied settings for a stream.  Each kind only looks at the fields that apply to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Milliseconds between events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Ticker symbols for `stock_prices`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,

    /// Fixed sensor id for `sensor_data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,

    /// Chat room for `chat`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl StreamConfig {
    /// The cadence for a stream of `kind` with this config, never below [`MIN_INTERVAL`].
    pub fn interval_for(&self, kind: StreamKind) -> Duration {
        self.interval
            .map(Duration::from_millis)
            .unwrap_or_else(|| kind.default_interval())
            .max(MIN_INTERVAL)
    }

    /// This config with the effective interval filled in, as acknowledged to the client
    pub fn resolved(&self, kind: StreamKind) -> Self {
        Self {
            interval: Some(self.interval_for(kind).as_millis() as u64),
            ..self.clone()
        }
    }
}

/// Control messages a client sends
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        stream: String,
    },
    Unsubscribe {
        stream: String,
    },
    #[serde(rename_all = "camelCase")]
    StartStream {
        /// Kept as a string so that an unknown kind can be reported by name
        stream_type: String,
        #[serde(default)]
        config: Option<StreamConfig>,
    },
    #[serde(rename_all = "camelCase")]
    StopStream {
        stream_id: String,
    },
    Ping,
}

/// The `type` values of [`ClientMessage`], plus a catch-all for everything else
#[derive(Debug, PartialEq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum ControlKind {
    Subscribe,
    Unsubscribe,
    StartStream,
    StopStream,
    Ping,
    #[strum(default)]
    Unknown(String),
}

/// Reasons a control message is turned away.  Reported in-band; the connection stays open.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("Invalid message format: {0}")]
    Malformed(String),

    #[error("Message is missing a string 'type' field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} message: {detail}")]
    InvalidFields { kind: String, detail: String },

    #[error("Binary messages are not supported")]
    Binary,
}

impl ClientMessage {
    /// Decode one text frame from a client
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ControlError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ControlError::Malformed("expected a JSON object".to_string()));
        }

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ControlError::MissingType)?
            .to_string();
        if let ControlKind::Unknown(kind) =
            ControlKind::from_str(&kind).unwrap_or_else(|_| ControlKind::Unknown(kind.clone()))
        {
            return Err(ControlError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| ControlError::InvalidFields {
            kind,
            detail: e.to_string(),
        })
    }
}

/// Everything the server sends on the channel, other than stream events
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message, sent once right after the channel opens
    #[serde(rename_all = "camelCase")]
    Connection {
        client_id: ConnectionId,
        available_streams: Vec<StreamKind>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StreamStarted {
        stream_id: StreamId,
        stream_type: StreamKind,
        config: StreamConfig,
    },
    #[serde(rename_all = "camelCase")]
    StreamStopped {
        stream_id: StreamId,
        stream_type: StreamKind,
    },
    Subscribed {
        stream: String,
    },
    Unsubscribed {
        stream: String,
    },
    Error {
        message: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    ServerShutdown {
        message: String,
    },
    /// Free-form message pushed by [`super::ConnectionRegistry::broadcast`] to a topic
    Broadcast {
        topic: Option<String>,
        data: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn error(error: impl std::fmt::Display) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }
}

/// One generated event, tagged with the kind of the stream that produced it
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub stream_id: StreamId,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// What actually goes into a connection's outbound queue
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Control(ServerMessage),
    Event(StreamEvent),
}

impl From<ServerMessage> for OutboundMessage {
    fn from(message: ServerMessage) -> Self {
        OutboundMessage::Control(message)
    }
}

impl From<StreamEvent> for OutboundMessage {
    fn from(event: StreamEvent) -> Self {
        OutboundMessage::Event(event)
    }
}

impl OutboundMessage {
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
