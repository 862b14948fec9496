// Module declarations
mod builder;
mod connection;
mod core;
pub mod machine;
mod state;

// Public API exports
pub use builder::{ConnectionClientBuilder, ConnectionOptions};
pub use connection::SocketLifecycle;
pub use self::core::ConnectionClient;
pub use machine::{ConnectionMachine, Effect, Event, MachineConfig};
pub use state::{ConnectionSnapshot, ConnectionState, HealthRecord, HealthStatus, Notification};
