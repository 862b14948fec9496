use super::connection::{Emitter, SocketLifecycle};
use super::machine::{ConnectionMachine, Effect, Event};
use super::state::{ConnectionSnapshot, ConnectionState};
use super::{ConnectionClientBuilder, ConnectionOptions};
use crate::infrastructure::{HealthCheck, TaskKind, TaskManager, spawn_prober, spawn_ticker};
use crate::messaging::{SubscriberRegistry, Subscription, SubscriptionId};
use crate::types::{ConnectionError, Result, WS_CLOSE_ABNORMAL};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use url::Url;

/// Everything the driver task reacts to, in arrival order
pub(crate) enum Input {
    Event(Event),
    /// API call; acknowledged once every resulting effect has been applied
    Call {
        event: Event,
        ack: oneshot::Sender<()>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        ack: Option<oneshot::Sender<()>>,
    },
}

/// Handle to a managed real-time connection.
///
/// Cloning is cheap; all clones drive the same connection. The connection
/// is torn down by [`shutdown()`](Self::shutdown) or when the last clone is
/// dropped.
///
/// # Example
///
/// ```no_run
/// use portal_link::{ConnectionClient, ConnectionOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ConnectionClient::new(ConnectionOptions::new("ws://localhost:3001"))?;
///
/// let subscription = client.subscribe(|snapshot| {
///     println!("{} ({:?})", snapshot.state, snapshot.notification);
/// });
///
/// client.send(r#"{"type":"HELLO"}"#).await;
/// subscription.unsubscribe();
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    input: mpsc::UnboundedSender<Input>,
    subscribers: Arc<SubscriberRegistry>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    client_id: String,
    transport_url: Url,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.input.send(Input::Shutdown { ack: None });
    }
}

impl ConnectionClient {
    pub fn builder(options: ConnectionOptions) -> Result<ConnectionClientBuilder> {
        ConnectionClientBuilder::new(options)
    }

    /// Builds a client with the WebSocket transport and the HTTP health check.
    ///
    /// Must be called inside a Tokio runtime; connecting starts immediately.
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        Self::builder(options)?.build()
    }

    pub(crate) fn start(
        driver: ConnectionDriver,
        input: mpsc::UnboundedSender<Input>,
        snapshot: watch::Receiver<ConnectionSnapshot>,
        transport_url: Url,
    ) -> Self {
        let client_id = driver.client_id.clone();
        let subscribers = Arc::clone(&driver.subscribers);
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(ClientInner {
                input,
                subscribers,
                snapshot,
                client_id,
                transport_url,
            }),
        }
    }

    /// Opens a transport unless one is already open or connecting
    pub async fn connect(&self) -> Result<()> {
        self.call(Event::Connect).await
    }

    /// Drops the current transport and starts over with a fresh retry budget
    pub async fn reconnect(&self) -> Result<()> {
        self.call(Event::Reconnect).await
    }

    /// Closes the transport and stops every timer until the next `connect()`
    pub async fn disconnect(&self) -> Result<()> {
        self.call(Event::Disconnect).await
    }

    /// Disconnects and stops the driver; later calls fail with
    /// [`ConnectionError::Shutdown`].
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.inner
            .input
            .send(Input::Shutdown { ack: Some(ack) })
            .map_err(|_| ConnectionError::Shutdown)?;
        done.await.map_err(|_| ConnectionError::Shutdown)
    }

    /// Sends a text frame. Returns `false` unless a transport is open.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        let (reply, answer) = oneshot::channel();
        let input = Input::Send {
            text: text.into(),
            reply,
        };
        if self.inner.input.send(input).is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Serializes `value` and sends it as a text frame
    pub async fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(text).await,
            Err(e) => {
                tracing::warn!("Failed to serialize outgoing message: {}", e);
                false
            }
        }
    }

    /// Registers `callback` for every snapshot change.
    ///
    /// Callbacks run on the driver task and must not block. A callback that
    /// holds a clone of the client keeps the connection up until `shutdown()`.
    /// A panic inside a callback is logged and does not reach the driver.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.subscribers.subscribe(callback);
        Subscription::new(id, &self.inner.subscribers)
    }

    /// Removes a subscriber; safe to call from inside a callback
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot.clone()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_online()
    }

    /// Identifier sent in every handshake of this client
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn transport_url(&self) -> &Url {
        &self.inner.transport_url
    }

    async fn call(&self, event: Event) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.inner
            .input
            .send(Input::Call { event, ack })
            .map_err(|_| ConnectionError::Shutdown)?;
        done.await.map_err(|_| ConnectionError::Shutdown)
    }
}

/// Owns the machine and carries out its effects. Runs as a single task.
pub(crate) struct ConnectionDriver {
    pub(crate) client_id: String,
    pub(crate) machine: ConnectionMachine,
    pub(crate) sockets: SocketLifecycle,
    pub(crate) tasks: TaskManager,
    pub(crate) health_check: Arc<dyn HealthCheck>,
    pub(crate) health_interval: Duration,
    pub(crate) input_tx: mpsc::UnboundedSender<Input>,
    pub(crate) input: mpsc::UnboundedReceiver<Input>,
    pub(crate) snapshot_tx: watch::Sender<ConnectionSnapshot>,
    pub(crate) subscribers: Arc<SubscriberRegistry>,
}

impl ConnectionDriver {
    /// Emitter handed to socket tasks
    pub(crate) fn emitter(input: &mpsc::UnboundedSender<Input>) -> Emitter {
        let input = input.clone();
        Arc::new(move |event| {
            let _ = input.send(Input::Event(event));
        })
    }

    async fn run(mut self) {
        tracing::info!("Connection driver started for {}", self.sockets.url());
        self.dispatch(Event::Connect).await;

        while let Some(input) = self.input.recv().await {
            match input {
                Input::Event(event) => self.dispatch(event).await,
                Input::Call { event, ack } => {
                    self.dispatch(event).await;
                    let _ = ack.send(());
                }
                Input::Send { text, reply } => {
                    let sent = match self.machine.open_generation() {
                        Some(generation) => self.sockets.send(generation, text),
                        None => {
                            tracing::debug!("Dropping outgoing frame, no open transport");
                            false
                        }
                    };
                    let _ = reply.send(sent);
                }
                Input::Shutdown { ack } => {
                    self.dispatch(Event::Disconnect).await;
                    self.tasks.abort_all();
                    self.subscribers.clear();
                    self.input.close();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }

        tracing::info!("Connection driver stopped");
    }

    async fn dispatch(&mut self, event: Event) {
        let now = time::Instant::now().into_std();
        let effects = self.machine.handle(event, now);
        for effect in effects {
            self.apply(effect).await;
        }
        self.publish();
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { generation } => {
                if let Err(e) = self.sockets.open(generation) {
                    tracing::error!("Cannot open transport {}: {}", generation, e);
                    let _ = self.input_tx.send(Input::Event(Event::TransportError {
                        generation,
                        error: e.to_string(),
                    }));
                    let _ = self.input_tx.send(Input::Event(Event::TransportClosed {
                        generation,
                        code: WS_CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    }));
                }
            }
            Effect::CloseTransport {
                generation,
                code,
                reason,
            } => {
                self.sockets.close(generation, code, reason).await;
            }
            Effect::Send {
                generation,
                message,
            } => match message.to_json() {
                Ok(text) => {
                    tracing::debug!("Sending {}", text);
                    if !self.sockets.send(generation, text) {
                        tracing::warn!("Transport {} gone before send", generation);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize message: {}", e),
            },
            Effect::ScheduleRetry { ticket, delay } => {
                let input = self.input_tx.clone();
                let handle = tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = input.send(Input::Event(Event::RetryElapsed { ticket }));
                });
                self.tasks.replace(TaskKind::Retry, handle);
            }
            Effect::CancelRetry => {
                self.tasks.cancel(TaskKind::Retry);
            }
            Effect::StartHeartbeat {
                generation,
                interval,
            } => {
                let input = self.input_tx.clone();
                let handle = spawn_ticker(interval, move || {
                    input
                        .send(Input::Event(Event::HeartbeatTick { generation }))
                        .is_ok()
                });
                self.tasks.replace(TaskKind::Heartbeat, handle);
            }
            Effect::StopHeartbeat => {
                self.tasks.cancel(TaskKind::Heartbeat);
            }
            Effect::StartHealthProbe { epoch } => {
                let input = self.input_tx.clone();
                let handle = spawn_prober(
                    Arc::clone(&self.health_check),
                    self.health_interval,
                    move |outcome| {
                        input
                            .send(Input::Event(Event::HealthProbed { epoch, outcome }))
                            .is_ok()
                    },
                );
                self.tasks.replace(TaskKind::HealthProbe, handle);
            }
            Effect::StopHealthProbe => {
                self.tasks.cancel(TaskKind::HealthProbe);
            }
        }
    }

    /// Republishes the snapshot if the transition changed it
    fn publish(&mut self) {
        let snapshot = self.machine.snapshot();
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });

        if changed {
            tracing::debug!(
                "State {} (notification: {:?})",
                snapshot.state,
                snapshot.notification
            );
            self.subscribers.notify(&snapshot);
        }
    }
}
