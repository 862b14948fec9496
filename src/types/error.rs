use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur when using the connection manager.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// WebSocket protocol error (handshake failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Transport failure reported by a connector implementation
    #[error("Transport error: {0}")]
    Transport(String),

    /// A transport is already active; it must be closed before opening another
    #[error("Transport already active (generation {0})")]
    TransportActive(u64),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (health probe)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Health endpoint answered with a non-success status
    #[error("Health check failed with status {status}")]
    HealthCheck { status: u16 },

    /// URL parsing error (malformed base URL)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Operation timed out
    #[error("Timeout error")]
    Timeout,

    /// The connection driver has shut down
    #[error("Connection manager has shut down")]
    Shutdown,
}

/// Convenience type alias for `Result<T, ConnectionError>`.
pub type Result<T> = std::result::Result<T, ConnectionError>;
