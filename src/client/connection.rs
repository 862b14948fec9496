use super::machine::Event;
use crate::types::{ConnectionError, Result, WS_CLOSE_ABNORMAL};
use crate::websocket::{Connector, TransportFrame};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

/// Where socket tasks deliver their events
pub(crate) type Emitter = Arc<dyn Fn(Event) + Send + Sync + 'static>;

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

struct ActiveSocket {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
}

/// Owns at most one transport at a time.
///
/// Each transport runs in its own task and reports back through the emitter,
/// tagging every event with its generation. A new transport can only be
/// opened once the previous one has been closed.
pub struct SocketLifecycle {
    connector: Arc<dyn Connector>,
    url: Url,
    connect_timeout: Duration,
    close_timeout: Duration,
    emit: Emitter,
    active: Option<ActiveSocket>,
}

impl SocketLifecycle {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        url: Url,
        connect_timeout: Duration,
        close_timeout: Duration,
        emit: Emitter,
    ) -> Self {
        Self {
            connector,
            url,
            connect_timeout,
            close_timeout,
            emit,
            active: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Generation of the transport currently owned, if any
    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|socket| socket.generation)
    }

    /// Starts connecting transport `generation`
    pub fn open(&mut self, generation: u64) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(ConnectionError::TransportActive(active.generation));
        }

        let (outgoing, commands) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            Arc::clone(&self.connector),
            self.url.clone(),
            self.connect_timeout,
            generation,
            commands,
            Arc::clone(&self.emit),
        ));

        tracing::debug!("Spawned socket task for transport {}", generation);
        self.active = Some(ActiveSocket {
            generation,
            outgoing,
            task,
        });
        Ok(())
    }

    /// Queues a text frame on transport `generation`
    pub fn send(&self, generation: u64, text: String) -> bool {
        match &self.active {
            Some(socket) if socket.generation == generation => {
                socket.outgoing.send(Outgoing::Text(text)).is_ok()
            }
            _ => false,
        }
    }

    /// Closes transport `generation` and waits for its task to finish.
    ///
    /// The task is aborted if the close handshake outlives the close timeout.
    pub async fn close(&mut self, generation: u64, code: u16, reason: String) {
        let Some(socket) = self.active.take_if(|socket| socket.generation == generation) else {
            return;
        };

        // Fails when the task already ended after a remote close
        let _ = socket.outgoing.send(Outgoing::Close { code, reason });

        let mut task = socket.task;
        match time::timeout(self.close_timeout, &mut task).await {
            Ok(_) => tracing::debug!("Transport {} released", generation),
            Err(_) => {
                tracing::warn!(
                    "Transport {} did not close within {:?}, aborting",
                    generation,
                    self.close_timeout
                );
                task.abort();
            }
        }
    }
}

async fn run_socket(
    connector: Arc<dyn Connector>,
    url: Url,
    connect_timeout: Duration,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    emit: Emitter,
) {
    // A handshake that completes alongside a close request still gets a proper close frame
    let connected = tokio::select! {
        biased;
        result = time::timeout(connect_timeout, connector.connect(&url)) => {
            result.unwrap_or_else(|_| Err(ConnectionError::Timeout))
        }
        _ = wait_for_close(&mut commands) => {
            tracing::debug!("Transport {} closed while connecting", generation);
            return;
        }
    };

    let (mut sink, mut frames) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {}", url, e);
            emit(Event::TransportError {
                generation,
                error: e.to_string(),
            });
            emit(Event::TransportClosed {
                generation,
                code: WS_CLOSE_ABNORMAL,
                reason: e.to_string(),
            });
            return;
        }
    };

    emit(Event::TransportOpened { generation });

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send_text(text).await {
                        tracing::warn!("Failed to send on transport {}: {}", generation, e);
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    if let Err(e) = sink.close(code, reason).await {
                        tracing::debug!("Close handshake on transport {} failed: {}", generation, e);
                    }
                    break;
                }
                None => break,
            },
            frame = frames.next() => match frame {
                Some(Ok(TransportFrame::Text(text))) => {
                    emit(Event::TransportMessage { generation, text });
                }
                Some(Ok(TransportFrame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => emit(Event::TransportMessage { generation, text }),
                    Err(_) => emit(Event::TransportUnreadable { generation }),
                },
                Some(Ok(TransportFrame::Closed { code, reason })) => {
                    emit(Event::TransportClosed { generation, code, reason });
                    break;
                }
                Some(Err(e)) => {
                    emit(Event::TransportError {
                        generation,
                        error: e.to_string(),
                    });
                    emit(Event::TransportClosed {
                        generation,
                        code: WS_CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    emit(Event::TransportClosed {
                        generation,
                        code: WS_CLOSE_ABNORMAL,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }

    tracing::debug!("Socket task for transport {} finished", generation);
}

/// Resolves once a close is requested or the lifecycle is gone
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, Outgoing::Close { .. }) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WS_CLOSE_NORMAL;
    use crate::websocket::testing::FakeServer;

    fn lifecycle(server: &FakeServer) -> (SocketLifecycle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emit: Emitter = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let url = Url::parse("ws://localhost:3001/ws").unwrap();
        let sockets = SocketLifecycle::new(
            Arc::new(server.connector()),
            url,
            Duration::from_secs(10),
            Duration::from_secs(5),
            emit,
        );
        (sockets, rx)
    }

    #[tokio::test]
    async fn test_open_send_and_close() {
        let server = FakeServer::new();
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(1).unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::TransportOpened { generation: 1 })
        );
        assert_eq!(server.live(), 1);

        assert!(sockets.send(1, "hello".to_string()));
        assert!(!sockets.send(2, "wrong generation".to_string()));

        let link = server.last_link();
        link.push_text("from server");
        assert_eq!(
            events.recv().await,
            Some(Event::TransportMessage {
                generation: 1,
                text: "from server".to_string(),
            })
        );

        sockets.close(1, WS_CLOSE_NORMAL, "bye".to_string()).await;
        assert_eq!(link.sent(), vec!["hello".to_string()]);
        assert_eq!(link.closed_with(), Some(WS_CLOSE_NORMAL));
        assert_eq!(server.live(), 0);
        assert_eq!(sockets.active_generation(), None);
    }

    #[tokio::test]
    async fn test_second_open_is_rejected() {
        let server = FakeServer::new();
        let (mut sockets, _events) = lifecycle(&server);

        sockets.open(1).unwrap();
        let err = sockets.open(2).unwrap_err();
        assert!(matches!(err, ConnectionError::TransportActive(1)));

        sockets.close(1, WS_CLOSE_NORMAL, String::new()).await;
        sockets.open(2).unwrap();
        assert_eq!(sockets.active_generation(), Some(2));
    }

    #[tokio::test]
    async fn test_refused_connect_reports_error_then_close() {
        let server = FakeServer::new();
        server.refuse_next(1);
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(7).unwrap();
        assert!(matches!(
            events.recv().await,
            Some(Event::TransportError { generation: 7, .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(Event::TransportClosed {
                generation: 7,
                code: WS_CLOSE_ABNORMAL,
                ..
            })
        ));

        // Slot stays occupied until released
        assert_eq!(sockets.active_generation(), Some(7));
        sockets.close(7, WS_CLOSE_ABNORMAL, String::new()).await;
        assert_eq!(sockets.active_generation(), None);
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let server = FakeServer::new();
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(1).unwrap();
        events.recv().await;

        server.last_link().close_from_server(1011);
        assert_eq!(
            events.recv().await,
            Some(Event::TransportClosed {
                generation: 1,
                code: 1011,
                reason: "server closed".to_string(),
            })
        );

        sockets.close(1, 1011, String::new()).await;
        assert_eq!(server.live(), 0);
        assert_eq!(server.last_link().closed_with(), None);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let server = FakeServer::new();
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(3).unwrap();
        events.recv().await;

        server.last_link().fail("reset by peer");
        assert!(matches!(
            events.recv().await,
            Some(Event::TransportError { generation: 3, .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(Event::TransportClosed {
                generation: 3,
                code: WS_CLOSE_ABNORMAL,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_close_of_other_generation_is_noop() {
        let server = FakeServer::new();
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(4).unwrap();
        events.recv().await;

        sockets.close(3, WS_CLOSE_NORMAL, String::new()).await;
        assert_eq!(sockets.active_generation(), Some(4));
        assert_eq!(server.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_times_out() {
        let server = FakeServer::new();
        server.hang_all(true);
        let (mut sockets, mut events) = lifecycle(&server);

        let started = time::Instant::now();
        sockets.open(2).unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::TransportError {
                generation: 2,
                error: ConnectionError::Timeout.to_string(),
            })
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(matches!(
            events.recv().await,
            Some(Event::TransportClosed {
                generation: 2,
                code: WS_CLOSE_ABNORMAL,
                ..
            })
        ));
        assert_eq!(server.attempts(), 1);
        assert_eq!(server.link_count(), 0);

        sockets.close(2, WS_CLOSE_ABNORMAL, String::new()).await;
        assert_eq!(sockets.active_generation(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_connecting_releases_slot() {
        let server = FakeServer::new();
        server.hang_all(true);
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(1).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        sockets.close(1, WS_CLOSE_NORMAL, String::new()).await;

        assert_eq!(sockets.active_generation(), None);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_binary_frames_are_decoded() {
        let server = FakeServer::new();
        let (mut sockets, mut events) = lifecycle(&server);

        sockets.open(1).unwrap();
        events.recv().await;

        let link = server.last_link();
        link.push_binary(br#"{"type":"NOTIFICATION","message":"bin"}"#);
        assert_eq!(
            events.recv().await,
            Some(Event::TransportMessage {
                generation: 1,
                text: r#"{"type":"NOTIFICATION","message":"bin"}"#.to_string(),
            })
        );

        link.push_binary(&[0xff, 0xfe, 0x00]);
        assert_eq!(
            events.recv().await,
            Some(Event::TransportUnreadable { generation: 1 })
        );
    }
}
