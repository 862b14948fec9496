// Infrastructure module - Timers, probes and policies behind the connection machine
pub mod backoff;
pub mod health;
pub mod heartbeat;
pub mod http;
pub mod reconnect;
pub mod task_manager;

pub use backoff::{BackoffPolicy, backoff_delay};
pub use health::{HealthCheck, HttpHealthCheck, ProbeOutcome, spawn_prober};
pub use heartbeat::{HeartbeatMonitor, PendingPing, spawn_ticker};
pub use http::{health_url, transport_url, ws_to_http_endpoint};
pub use reconnect::{ReconnectScheduler, ScheduledRetry};
pub use task_manager::{TaskKind, TaskManager};
