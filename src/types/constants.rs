/// Wire `type` discriminants (magic strings layer)
pub mod message_types {
    pub const CLIENT_CONNECT: &str = "CLIENT_CONNECT";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";
    pub const SERVER_STATUS: &str = "SERVER_STATUS";
    pub const NOTIFICATION: &str = "NOTIFICATION";
}

/// `SERVER_STATUS` value that promotes the connection to server-ready
pub const SERVER_STATUS_READY: &str = "READY";

/// Path of the transport endpoint, appended to the base URL
pub const TRANSPORT_PATH: &str = "ws";

/// Path of the HTTP health endpoint, appended to the HTTP base URL
pub const HEALTH_PATH: &str = "health";

/// Default heartbeat interval (milliseconds)
pub const HEARTBEAT_INTERVAL: u64 = 30_000;

/// Default health poll interval (milliseconds)
pub const HEALTH_INTERVAL: u64 = 60_000;

/// Default health request timeout (milliseconds)
pub const HEALTH_TIMEOUT: u64 = 10_000;

/// Reconnection backoff base delay (milliseconds)
pub const RECONNECT_BASE_DELAY: u64 = 1_000;

/// Reconnection backoff cap (milliseconds)
pub const RECONNECT_MAX_DELAY: u64 = 30_000;

/// Reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// How long opening a transport may take before it counts as failed (milliseconds)
pub const CONNECT_TIMEOUT: u64 = 10_000;

/// How long a close handshake may take before the socket task is aborted (milliseconds)
pub const CLOSE_TIMEOUT: u64 = 5_000;

/// WebSocket close codes
pub const WS_CLOSE_NORMAL: u16 = 1000;
pub const WS_CLOSE_NO_STATUS: u16 = 1005;
pub const WS_CLOSE_ABNORMAL: u16 = 1006;
/// Application-defined: closed locally after a ping went unanswered
pub const WS_CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
