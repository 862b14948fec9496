use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Connection lifecycle as observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    ServerReady,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::ServerReady => "SERVER_READY",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        }
    }

    /// Connected or server-ready
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Connected | Self::ServerReady)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last informational event surfaced to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Notification {
    Connected,
    ServerReady,
    Disconnected,
    ConnectionError,
    ConnectionFailed,
    /// Text carried by a server `NOTIFICATION`
    Message(String),
    /// A frame that matched no known message shape
    Unrecognized,
}

impl Notification {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "CONNECTED",
            Self::ServerReady => "SERVER_READY",
            Self::Disconnected => "DISCONNECTED",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::Message(text) => text,
            Self::Unrecognized => "UNRECOGNIZED_MESSAGE",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Server health as last measured by the HTTP probe or the heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    /// Serialized as RFC 3339 / ISO 8601
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_latency_ms")]
    pub latency: Option<Duration>,
}

impl HealthRecord {
    pub fn latency_millis(&self) -> Option<u128> {
        self.latency.map(|latency| latency.as_millis())
    }
}

fn serialize_latency_ms<S>(latency: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match latency {
        Some(latency) => serializer.serialize_some(&(latency.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// Everything subscribers observe, republished on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub notification: Option<Notification>,
    /// Bumped on every surfaced notification, including repeats of the same text
    pub notification_seq: u64,
    pub health: HealthRecord,
    /// Reconnection attempts since the last successful open
    pub retry_attempt: u32,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            notification: None,
            notification_seq: 0,
            health: HealthRecord::default(),
            retry_attempt: 0,
        }
    }
}
