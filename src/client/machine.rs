use super::state::{ConnectionSnapshot, ConnectionState, HealthRecord, HealthStatus, Notification};
use crate::infrastructure::{
    BackoffPolicy, HeartbeatMonitor, PendingPing, ProbeOutcome, ReconnectScheduler,
};
use crate::messaging::{Inbound, classify};
use crate::types::{
    ClientMessage, HEARTBEAT_INTERVAL, MAX_RECONNECT_ATTEMPTS, WS_CLOSE_HEARTBEAT_TIMEOUT,
    WS_CLOSE_NORMAL,
};
use chrono::Utc;
use std::time::{Duration, Instant};

/// Static parameters of the connection machine
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Identifier sent in every handshake
    pub client_id: String,
    pub backoff: BackoffPolicy,
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Treat a ping still unanswered at the next tick as a dead transport
    pub close_on_missed_pong: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            backoff: BackoffPolicy::default(),
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL),
            close_on_missed_pong: false,
        }
    }
}

/// Inputs to the machine. Transport events carry the generation of the
/// transport that produced them; timer events carry their ticket or epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Reconnect,
    Disconnect,
    TransportOpened { generation: u64 },
    TransportMessage { generation: u64, text: String },
    /// A frame that could not be decoded as text
    TransportUnreadable { generation: u64 },
    TransportError { generation: u64, error: String },
    TransportClosed { generation: u64, code: u16, reason: String },
    RetryElapsed { ticket: u64 },
    HeartbeatTick { generation: u64 },
    HealthProbed { epoch: u64, outcome: ProbeOutcome },
}

/// Side effects the driver must carry out, in order.
///
/// `CloseTransport` both closes and releases the transport; it is also
/// emitted for transports the remote side already closed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport { generation: u64 },
    CloseTransport { generation: u64, code: u16, reason: String },
    Send { generation: u64, message: ClientMessage },
    ScheduleRetry { ticket: u64, delay: Duration },
    CancelRetry,
    StartHeartbeat { generation: u64, interval: Duration },
    StopHeartbeat,
    StartHealthProbe { epoch: u64 },
    StopHealthProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransportSlot {
    generation: u64,
    open: bool,
}

/// The connection state machine.
///
/// All state lives here and changes only through [`ConnectionMachine::handle`],
/// which performs no I/O. Inputs from a superseded transport, a cancelled
/// retry or a stopped health probe are discarded.
pub struct ConnectionMachine {
    config: MachineConfig,
    state: ConnectionState,
    notification: Option<Notification>,
    notification_seq: u64,
    health: HealthRecord,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    transport: Option<TransportSlot>,
    next_generation: u64,
    health_epoch: Option<u64>,
    next_health_epoch: u64,
}

impl ConnectionMachine {
    pub fn new(config: MachineConfig) -> Self {
        let scheduler = ReconnectScheduler::new(config.backoff, config.max_attempts);
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval);
        Self {
            config,
            state: ConnectionState::Connecting,
            notification: None,
            notification_seq: 0,
            health: HealthRecord::default(),
            scheduler,
            heartbeat,
            transport: None,
            next_generation: 0,
            health_epoch: None,
            next_health_epoch: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    pub fn health(&self) -> &HealthRecord {
        &self.health
    }

    pub fn retry_attempt(&self) -> u32 {
        self.scheduler.attempts()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.scheduler.has_pending()
    }

    pub fn pending_ping(&self) -> Option<PendingPing> {
        self.heartbeat.pending()
    }

    pub fn is_health_probe_running(&self) -> bool {
        self.health_epoch.is_some()
    }

    /// Generation of the transport that is open, if any
    pub fn open_generation(&self) -> Option<u64> {
        self.transport
            .filter(|slot| slot.open)
            .map(|slot| slot.generation)
    }

    /// Generation of the transport that is open or connecting, if any
    pub fn active_generation(&self) -> Option<u64> {
        self.transport.map(|slot| slot.generation)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            notification: self.notification.clone(),
            notification_seq: self.notification_seq,
            health: self.health.clone(),
            retry_attempt: self.scheduler.attempts(),
        }
    }

    /// The single transition function
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            Event::Connect => self.connect(&mut effects),
            Event::Reconnect => self.reconnect(&mut effects),
            Event::Disconnect => self.disconnect(&mut effects),
            Event::TransportOpened { generation } => {
                if self.is_current(generation) {
                    self.on_open(generation, &mut effects);
                } else {
                    tracing::debug!("Ignoring open of stale transport {}", generation);
                }
            }
            Event::TransportMessage { generation, text } => {
                if self.open_generation() == Some(generation) {
                    self.on_message(&text, now);
                } else {
                    tracing::debug!("Ignoring message from stale transport {}", generation);
                }
            }
            Event::TransportUnreadable { generation } => {
                if self.open_generation() == Some(generation) {
                    tracing::warn!("Undecodable frame on transport {}", generation);
                    self.notify(Notification::Unrecognized);
                }
            }
            Event::TransportError { generation, error } => {
                if self.is_current(generation) {
                    self.on_error(&error);
                } else {
                    tracing::debug!("Ignoring error from stale transport {}", generation);
                }
            }
            Event::TransportClosed {
                generation,
                code,
                reason,
            } => {
                if self.is_current(generation) {
                    self.on_closed(generation, code, &reason, &mut effects);
                } else {
                    tracing::debug!("Ignoring close of stale transport {}", generation);
                }
            }
            Event::RetryElapsed { ticket } => {
                if self.scheduler.fire(ticket) {
                    tracing::info!(
                        "Reconnection attempt {}/{}",
                        self.scheduler.attempts(),
                        self.scheduler.max_attempts()
                    );
                    self.connect(&mut effects);
                } else {
                    tracing::debug!("Ignoring stale retry ticket {}", ticket);
                }
            }
            Event::HeartbeatTick { generation } => {
                if self.open_generation() == Some(generation) {
                    self.on_heartbeat(generation, now, &mut effects);
                }
            }
            Event::HealthProbed { epoch, outcome } => {
                if self.health_epoch == Some(epoch) {
                    self.on_probe(outcome);
                } else {
                    tracing::debug!("Ignoring result of stopped health probe {}", epoch);
                }
            }
        }

        effects
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active_generation() == Some(generation)
    }

    fn notify(&mut self, notification: Notification) {
        self.notification = Some(notification);
        self.notification_seq += 1;
    }

    fn connect(&mut self, effects: &mut Vec<Effect>) {
        self.ensure_health_probe(effects);

        if let Some(slot) = self.transport {
            tracing::debug!(
                "Transport {} already active, connect is a no-op",
                slot.generation
            );
            return;
        }

        if self.scheduler.cancel() {
            effects.push(Effect::CancelRetry);
        }

        self.state = if self.scheduler.attempts() == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        self.transport = Some(TransportSlot {
            generation,
            open: false,
        });

        tracing::info!("Opening transport {} ({})", generation, self.state);
        effects.push(Effect::OpenTransport { generation });
    }

    fn reconnect(&mut self, effects: &mut Vec<Effect>) {
        tracing::info!("Manual reconnect requested");
        if self.scheduler.cancel() {
            effects.push(Effect::CancelRetry);
        }
        self.release_transport(WS_CLOSE_NORMAL, "client reconnect", effects);
        self.scheduler.reset();
        self.connect(effects);
    }

    fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        tracing::info!("Disconnect requested");
        self.scheduler.cancel();
        effects.push(Effect::CancelRetry);

        self.release_transport(WS_CLOSE_NORMAL, "client disconnect", effects);
        effects.push(Effect::StopHeartbeat);

        self.health_epoch = None;
        effects.push(Effect::StopHealthProbe);

        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            self.notify(Notification::Disconnected);
        }
    }

    /// Forgets the active transport and asks the driver to close it
    fn release_transport(&mut self, code: u16, reason: &str, effects: &mut Vec<Effect>) {
        if let Some(slot) = self.transport.take() {
            self.heartbeat.clear();
            effects.push(Effect::StopHeartbeat);
            effects.push(Effect::CloseTransport {
                generation: slot.generation,
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn ensure_health_probe(&mut self, effects: &mut Vec<Effect>) {
        if self.health_epoch.is_none() {
            self.next_health_epoch += 1;
            self.health_epoch = Some(self.next_health_epoch);
            effects.push(Effect::StartHealthProbe {
                epoch: self.next_health_epoch,
            });
        }
    }

    fn on_open(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if let Some(slot) = self.transport.as_mut() {
            slot.open = true;
        }
        self.scheduler.reset();
        self.heartbeat.clear();
        self.state = ConnectionState::Connected;
        self.notify(Notification::Connected);
        tracing::info!("Transport {} open", generation);

        effects.push(Effect::Send {
            generation,
            message: ClientMessage::client_connect(
                self.config.client_id.clone(),
                Utc::now().timestamp_millis(),
            ),
        });
        effects.push(Effect::StartHeartbeat {
            generation,
            interval: self.heartbeat.interval(),
        });
    }

    fn on_message(&mut self, text: &str, now: Instant) {
        match classify(text) {
            Inbound::Pong => match self.heartbeat.take_latency(now) {
                Some(latency) => {
                    tracing::debug!("Heartbeat round trip {:?}", latency);
                    self.health.status = HealthStatus::Healthy;
                    self.health.latency = Some(latency);
                    self.health.checked_at = Some(Utc::now());
                }
                None => tracing::debug!("PONG without outstanding ping, ignoring"),
            },
            Inbound::ServerStatus { ready, status } => {
                tracing::debug!("Server status {}", status);
                self.health.status = if ready {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                };
                self.health.checked_at = Some(Utc::now());

                if ready && self.state.is_online() {
                    self.state = ConnectionState::ServerReady;
                    self.notify(Notification::ServerReady);
                }
            }
            Inbound::Notification(text) => self.notify(Notification::Message(text)),
            Inbound::Unrecognized => self.notify(Notification::Unrecognized),
        }
    }

    fn on_error(&mut self, error: &str) {
        tracing::error!("Transport error: {}", error);
        self.state = ConnectionState::Error;
        self.notify(Notification::ConnectionError);
    }

    fn on_closed(&mut self, generation: u64, code: u16, reason: &str, effects: &mut Vec<Effect>) {
        self.transport = None;
        self.heartbeat.clear();
        effects.push(Effect::StopHeartbeat);
        effects.push(Effect::CloseTransport {
            generation,
            code,
            reason: reason.to_string(),
        });

        if code == WS_CLOSE_NORMAL {
            tracing::info!("Transport closed normally: '{}'", reason);
            if self.scheduler.cancel() {
                effects.push(Effect::CancelRetry);
            }
            self.state = ConnectionState::Disconnected;
            self.notify(Notification::Disconnected);
            return;
        }

        match self.scheduler.schedule() {
            Some(retry) => {
                tracing::warn!(
                    "Transport closed abnormally (code={}, reason='{}'), retrying in {:?}",
                    code,
                    reason,
                    retry.delay
                );
                self.state = ConnectionState::Reconnecting;
                effects.push(Effect::ScheduleRetry {
                    ticket: retry.ticket,
                    delay: retry.delay,
                });
            }
            None => {
                tracing::error!(
                    "Transport closed (code={}), giving up after {} attempts",
                    code,
                    self.scheduler.attempts()
                );
                self.state = ConnectionState::Error;
                self.notify(Notification::ConnectionFailed);
            }
        }
    }

    fn on_heartbeat(&mut self, generation: u64, now: Instant, effects: &mut Vec<Effect>) {
        if self.config.close_on_missed_pong && self.heartbeat.has_pending() {
            tracing::warn!("Heartbeat timeout detected, closing transport {}", generation);
            self.on_closed(
                generation,
                WS_CLOSE_HEARTBEAT_TIMEOUT,
                "heartbeat timeout",
                effects,
            );
            return;
        }

        let message = self
            .heartbeat
            .record_ping(now, Utc::now().timestamp_millis());
        effects.push(Effect::Send {
            generation,
            message,
        });
    }

    fn on_probe(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Healthy {
                latency,
                checked_at,
            } => {
                self.health = HealthRecord {
                    status: HealthStatus::Healthy,
                    checked_at: Some(checked_at),
                    latency: Some(latency),
                };
            }
            ProbeOutcome::Unhealthy { checked_at, .. } => {
                self.health.status = HealthStatus::Unhealthy;
                self.health.checked_at = Some(checked_at);
            }
        }
    }
}
