use crate::types::{Result, WS_CLOSE_NO_STATUS};
use async_trait::async_trait;
use futures::SinkExt;
use futures::stream::{BoxStream, SplitSink, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a transport delivers to the socket lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    /// Binary payload, decoded by the socket task
    Binary(Vec<u8>),
    Closed { code: u16, reason: String },
}

/// Inbound half of an open transport; an `Err` item means the transport failed
pub type TransportStream = BoxStream<'static, Result<TransportFrame>>;

/// Outbound half of an open transport
#[async_trait]
pub trait TransportSink: Send + 'static {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Starts the close handshake with `code`
    async fn close(&mut self, code: u16, reason: String) -> Result<()>;
}

/// Port that opens transports. Swapped for an in-memory one in tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn TransportSink>, TransportStream)>;
}

/// WebSocket factory for creating WebSocket connections
pub struct WebSocketFactory;

impl WebSocketFactory {
    /// Create a new WebSocket connection
    pub async fn create(url: &str) -> Result<WsStream> {
        tracing::debug!("Creating WebSocket connection to: {}", url);
        let (ws_stream, response) = connect_async(url).await?;
        tracing::debug!("WebSocket handshake completed: {}", response.status());
        Ok(ws_stream)
    }
}

#[async_trait]
impl Connector for WebSocketFactory {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn TransportSink>, TransportStream)> {
        let ws_stream = Self::create(url.as_str()).await?;
        let (write_half, read_half) = ws_stream.split();

        let frames = read_half
            .filter_map(|msg_result| async move {
                match msg_result {
                    Ok(Message::Text(text)) => Some(Ok(TransportFrame::Text(text.as_str().to_owned()))),
                    Ok(Message::Close(frame)) => Some(Ok(match frame {
                        Some(close_frame) => {
                            tracing::debug!(
                                "Server closed connection: code={:?}, reason='{}'",
                                close_frame.code,
                                close_frame.reason
                            );
                            TransportFrame::Closed {
                                code: u16::from(close_frame.code),
                                reason: close_frame.reason.as_str().to_owned(),
                            }
                        }
                        None => {
                            tracing::warn!("Server closed connection without close frame");
                            TransportFrame::Closed {
                                code: WS_CLOSE_NO_STATUS,
                                reason: String::new(),
                            }
                        }
                    })),
                    Ok(Message::Binary(data)) => {
                        tracing::debug!("Received binary message ({} bytes)", data.len());
                        Some(Ok(TransportFrame::Binary(data.to_vec())))
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                    Err(e) => Some(Err(e.into())),
                }
            })
            .boxed();

        Ok((Box::new(WebSocketSink { inner: write_half }), frames))
    }
}

struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.inner.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.inner.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}
