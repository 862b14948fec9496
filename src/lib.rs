//! # Portal Link
//!
//! Real-time connection manager for the counseling portal: keeps one
//! WebSocket transport to the server alive, reconnects with exponential
//! backoff up to a retry ceiling, measures latency with a PING/PONG
//! heartbeat and polls an HTTP health endpoint on the side.
//!
//! ## Example
//!
//! ```no_run
//! use portal_link::{ConnectionClient, ConnectionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ConnectionClient::new(ConnectionOptions::new("ws://localhost:3001"))?;
//!
//!     let _subscription = client.subscribe(|snapshot| {
//!         println!("{} health={:?}", snapshot.state, snapshot.health.status);
//!     });
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod types;
pub mod websocket;

pub use client::{
    ConnectionClient, ConnectionClientBuilder, ConnectionOptions, ConnectionSnapshot,
    ConnectionState, HealthRecord, HealthStatus, Notification,
};
pub use infrastructure::{BackoffPolicy, HealthCheck, HttpHealthCheck, backoff_delay};
pub use messaging::{Subscription, SubscriptionId};
pub use types::{ClientMessage, ConnectionError, Result, ServerMessage};
pub use websocket::{Connector, TransportFrame, TransportSink, TransportStream};
