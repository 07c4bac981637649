use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// The kinds of synthetic data stream a client can start.
///
/// The wire name (in control messages and as the `type` of every event) is the snake_case form.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamKind {
    UserActivity,
    Analytics,
    Chat,
    SensorData,
    LogEvents,
    StockPrices,
}

impl StreamKind {
    pub fn all() -> Vec<StreamKind> {
        Self::iter().collect()
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Time between events when the client doesn't configure an interval
    pub fn default_interval(self) -> Duration {
        Duration::from_millis(match self {
            StreamKind::UserActivity => 2000,
            StreamKind::Analytics => 5000,
            StreamKind::Chat => 3000,
            StreamKind::SensorData => 1000,
            StreamKind::LogEvents => 2000,
            StreamKind::StockPrices => 1500,
        })
    }

    /// Streams that imitate people get an irregular cadence: each delay is stretched by up to
    /// this fraction of the interval.
    pub fn jitter(self) -> f64 {
        match self {
            StreamKind::UserActivity | StreamKind::Chat => 0.5,
            _ => 0.0,
        }
    }
}
