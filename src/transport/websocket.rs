//! WebSocket client transport.
//!
//! Dials the remote debugging endpoint and pumps inbound frames into the
//! connection's receive channel. The write half lives behind an async mutex
//! so concurrent senders never interleave a frame mid-write; the read half
//! is owned by a pump task that translates the socket's lifecycle into
//! [`TransportEvent`]s exactly once.

// ============================================================================
// Imports
// ============================================================================

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace};
use url::Url;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportRx};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Transport over a WebSocket connection to the debugging endpoint.
pub struct WebSocketTransport {
    /// Write half; locked per frame so writes never interleave.
    writer: Mutex<WsSink>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport").finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Connects to a `ws://` / `wss://` endpoint.
    ///
    /// Returns the outbound transport handle plus the inbound event stream
    /// that must be handed to the connection's receive loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Endpoint`] if `endpoint` is not a WebSocket URL
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(endpoint: &str) -> Result<(std::sync::Arc<Self>, TransportRx)> {
        let url = Url::parse(endpoint).map_err(|e| Error::endpoint(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::endpoint(format!(
                "expected ws:// or wss:// scheme, got {}",
                url.scheme()
            )));
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(endpoint = %url, "WebSocket connected");

        let (sink, stream) = ws_stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::pump(stream, events_tx));

        let transport = std::sync::Arc::new(Self {
            writer: Mutex::new(sink),
        });
        Ok((transport, events_rx))
    }

    /// Reads socket messages and forwards them as transport events.
    ///
    /// Emits exactly one terminal event (`Closed` or `Error`) and stops.
    async fn pump(mut stream: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    trace!(len = text.len(), "Frame received");
                    if events.send(TransportEvent::Frame(text.to_string())).is_err() {
                        debug!("Receive loop gone, stopping pump");
                        return;
                    }
                }

                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by remote");
                    let _ = events.send(TransportEvent::Closed);
                    return;
                }

                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    return;
                }

                // Ignore Binary, Ping, Pong, Frame
                _ => {}
            }
        }

        debug!("WebSocket stream ended");
        let _ = events.send(TransportEvent::Closed);
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
