//! In-memory transport and health check used by driver tests.

use super::factory::{Connector, TransportFrame, TransportSink, TransportStream};
use crate::infrastructure::HealthCheck;
use crate::types::{ConnectionError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;
use url::Url;

#[derive(Default)]
struct ServerState {
    refusals: VecDeque<bool>,
    refuse_all: bool,
    hang: bool,
    attempts: usize,
    links: Vec<FakeLink>,
    live: usize,
    max_live: usize,
}

/// Test-side view of the fake server
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        let mut state = self.state.lock();
        state.refusals.extend(std::iter::repeat_n(true, count));
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Connection attempts never complete while set
    pub fn hang_all(&self, hang: bool) {
        self.state.lock().hang = hang;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().max_live
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    /// The most recently accepted link
    pub fn last_link(&self) -> FakeLink {
        self.state
            .lock()
            .links
            .last()
            .cloned()
            .expect("no accepted link")
    }

    pub fn link(&self, index: usize) -> FakeLink {
        self.state.lock().links[index].clone()
    }
}

/// One accepted connection
#[derive(Clone)]
pub struct FakeLink {
    pub url: Url,
    frames: mpsc::UnboundedSender<Result<TransportFrame>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

impl FakeLink {
    pub fn push_text(&self, text: &str) {
        let _ = self.frames.send(Ok(TransportFrame::Text(text.to_string())));
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        let _ = self.frames.send(Ok(TransportFrame::Binary(bytes.to_vec())));
    }

    pub fn close_from_server(&self, code: u16) {
        let _ = self.frames.send(Ok(TransportFrame::Closed {
            code,
            reason: "server closed".to_string(),
        }));
    }

    pub fn fail(&self, error: &str) {
        let _ = self
            .frames
            .send(Err(ConnectionError::Transport(error.to_string())));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|value| value["type"] == kind)
            .collect()
    }

    /// Close code the client sent, if it closed this link
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock()
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn TransportSink>, TransportStream)> {
        let hang = {
            let mut state = self.server.state.lock();
            state.attempts += 1;
            state.hang
        };
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut state = self.server.state.lock();
        let refused = state.refusals.pop_front().unwrap_or(false) || state.refuse_all;
        if refused {
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let link = FakeLink {
            url: url.clone(),
            frames: frames_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed_with: Arc::new(Mutex::new(None)),
        };
        state.links.push(link.clone());
        state.live += 1;
        state.max_live = state.max_live.max(state.live);

        let stream = stream::unfold(frames_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed();

        let sink = FakeSink {
            link,
            server: self.server.clone(),
        };
        Ok((Box::new(sink), stream))
    }
}

struct FakeSink {
    link: FakeLink,
    server: FakeServer,
}

#[async_trait]
impl TransportSink for FakeSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.link.sent.lock().push(text);
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: String) -> Result<()> {
        *self.link.closed_with.lock() = Some(code);
        Ok(())
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.server.state.lock().live -= 1;
    }
}

/// Health check with a switchable answer that counts its calls
#[derive(Default)]
pub struct FakeHealth {
    pub unhealthy: AtomicBool,
    /// Flip the answer after every call
    pub alternate: AtomicBool,
    pub calls: AtomicU32,
}

impl FakeHealth {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for FakeHealth {
    async fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let unhealthy = if self.alternate.load(Ordering::SeqCst) {
            self.unhealthy.fetch_xor(true, Ordering::SeqCst)
        } else {
            self.unhealthy.load(Ordering::SeqCst)
        };
        if unhealthy {
            Err(ConnectionError::HealthCheck { status: 503 })
        } else {
            Ok(())
        }
    }
}
