use serde::{Deserialize, Serialize};

/// Messages sent from this client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Handshake sent right after the transport opens
    ClientConnect {
        #[serde(rename = "clientId")]
        client_id: String,
        timestamp: i64,
    },
    /// Heartbeat probe; the server answers with `PONG`
    Ping { timestamp: i64 },
}

impl ClientMessage {
    pub fn client_connect(client_id: impl Into<String>, timestamp: i64) -> Self {
        Self::ClientConnect {
            client_id: client_id.into(),
            timestamp,
        }
    }

    pub fn ping(timestamp: i64) -> Self {
        Self::Ping { timestamp }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages the server is known to send. Anything else surfaces as unrecognized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Pong {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    ServerStatus {
        status: String,
    },
    Notification {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
}
