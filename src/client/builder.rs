use super::ConnectionClient;
use super::connection::SocketLifecycle;
use super::core::ConnectionDriver;
use super::machine::{ConnectionMachine, MachineConfig};
use super::state::ConnectionSnapshot;
use crate::infrastructure::{
    BackoffPolicy, HealthCheck, HttpHealthCheck, TaskManager, health_url, transport_url,
    ws_to_http_endpoint,
};
use crate::messaging::SubscriberRegistry;
use crate::types::{
    CLOSE_TIMEOUT, CONNECT_TIMEOUT, ConnectionError, HEALTH_INTERVAL, HEALTH_TIMEOUT, HEARTBEAT_INTERVAL,
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY, Result,
};
use crate::websocket::{Connector, WebSocketFactory};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Connection settings. Every field except `base_url` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// `ws(s)://` or `http(s)://` base; the transport lives at `{base_url}/ws`
    pub base_url: String,
    /// Base for the health endpoint; derived from `base_url` when absent
    pub http_base_url: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Limit on opening a transport; an attempt that runs over counts as an abnormal close
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Close the transport (code 4000) when a ping is still unanswered at the next tick
    pub close_on_missed_pong: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            http_base_url: None,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL,
            health_interval_ms: HEALTH_INTERVAL,
            health_timeout_ms: HEALTH_TIMEOUT,
            base_delay_ms: RECONNECT_BASE_DELAY,
            max_delay_ms: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            connect_timeout_ms: CONNECT_TIMEOUT,
            close_timeout_ms: CLOSE_TIMEOUT,
            close_on_missed_pong: false,
        }
    }
}

impl ConnectionOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Reads `PORTAL_*` environment variables over the defaults.
    ///
    /// `PORTAL_BASE_URL` is required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = lookup("PORTAL_BASE_URL")
            .ok_or_else(|| ConnectionError::Config("PORTAL_BASE_URL is not set".to_string()))?;

        let mut options = Self::new(base_url);
        options.http_base_url = lookup("PORTAL_HTTP_BASE_URL");

        if let Some(value) = lookup("PORTAL_HEARTBEAT_INTERVAL_MS") {
            options.heartbeat_interval_ms = parse_var("PORTAL_HEARTBEAT_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("PORTAL_HEALTH_INTERVAL_MS") {
            options.health_interval_ms = parse_var("PORTAL_HEALTH_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("PORTAL_MAX_ATTEMPTS") {
            options.max_attempts = parse_var("PORTAL_MAX_ATTEMPTS", &value)?;
        }

        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConnectionError::Config("base URL is required".to_string()));
        }

        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("health_interval_ms", self.health_interval_ms),
            ("health_timeout_ms", self.health_timeout_ms),
            ("base_delay_ms", self.base_delay_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("close_timeout_ms", self.close_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConnectionError::Config(format!("{} must be positive", name)));
            }
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConnectionError::Config(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }

        Ok(())
    }

    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConnectionError::Config(format!("{} has an invalid value '{}'", name, value)))
}

/// Builder for [`ConnectionClient`]; validates options and wires the ports
pub struct ConnectionClientBuilder {
    options: ConnectionOptions,
    transport_url: Url,
    health_url: Url,
    connector: Option<Arc<dyn Connector>>,
    health_check: Option<Arc<dyn HealthCheck>>,
}

impl ConnectionClientBuilder {
    /// Create a new builder
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        options.validate()?;

        let transport_url = transport_url(&options.base_url)?;
        let health_url = match &options.http_base_url {
            Some(http_base) => health_url(http_base)?,
            None => health_url(ws_to_http_endpoint(&options.base_url)?.as_str())?,
        };

        Ok(Self {
            options,
            transport_url,
            health_url,
            connector: None,
            health_check: None,
        })
    }

    /// Replace the WebSocket transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the HTTP health check
    pub fn with_health_check(mut self, health_check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn transport_url(&self) -> &Url {
        &self.transport_url
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }

    /// Build the client and spawn the driver, which starts connecting right away
    pub fn build(self) -> Result<ConnectionClient> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ConnectionError::Config(
                "a Tokio runtime is required to build the client".to_string(),
            ));
        }

        let health_check: Arc<dyn HealthCheck> = match self.health_check {
            Some(check) => check,
            None => Arc::new(HttpHealthCheck::new(
                self.health_url.clone(),
                Duration::from_millis(self.options.health_timeout_ms),
            )?),
        };
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketFactory),
        };

        let client_id = uuid::Uuid::now_v7().to_string();
        tracing::info!(
            "Building connection client {} for {}",
            client_id,
            self.transport_url
        );

        let machine = ConnectionMachine::new(MachineConfig {
            client_id: client_id.clone(),
            backoff: self.options.backoff(),
            max_attempts: self.options.max_attempts,
            heartbeat_interval: Duration::from_millis(self.options.heartbeat_interval_ms),
            close_on_missed_pong: self.options.close_on_missed_pong,
        });

        let (input_tx, input) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ConnectionSnapshot::default());

        let sockets = SocketLifecycle::new(
            connector,
            self.transport_url.clone(),
            Duration::from_millis(self.options.connect_timeout_ms),
            Duration::from_millis(self.options.close_timeout_ms),
            ConnectionDriver::emitter(&input_tx),
        );

        let driver = ConnectionDriver {
            client_id,
            machine,
            sockets,
            tasks: TaskManager::new(),
            health_check,
            health_interval: Duration::from_millis(self.options.health_interval_ms),
            input_tx: input_tx.clone(),
            input,
            snapshot_tx,
            subscribers: Arc::new(SubscriberRegistry::new()),
        };

        Ok(ConnectionClient::start(
            driver,
            input_tx,
            snapshot_rx,
            self.transport_url,
        ))
    }
}
