//! WebSocket relay connector

use super::link::{SignalSender, SignalingConnector, SignalingLink};
use super::protocol::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the relay's `connected` handshake
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to a relay speaking JSON text frames over WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url` (ws:// or wss://)
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Relay URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: serializes queued messages onto the socket
    ///
    /// Ends (and closes the socket) once every `SignalSender` is dropped.
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode {} message: {}", msg.event_name(), e);
                    continue;
                }
            };

            if let Err(e) = write.send(Message::Text(json)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }

        let _ = write.send(Message::Close(None)).await;
        debug!("Sender task terminated");
    }

    /// Receiver task: parses frames and forwards them to the link
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<SignalingMessage>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            // Link dropped
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to handle signaling message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Receiver task terminated");
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self) -> Result<SignalingLink> {
        info!("Connecting to signaling server: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, mut read) = ws_stream.split();

        // The relay announces our identity before anything else
        let handshake = async {
            while let Some(frame) = read.next().await {
                let frame =
                    frame.map_err(|e| Error::WebSocketError(format!("Handshake failed: {}", e)))?;
                match frame {
                    Message::Text(text) => match SignalingMessage::from_json(&text)? {
                        SignalingMessage::Connected { id } => return Ok(id),
                        other => warn!(
                            "Ignoring {} before handshake completed",
                            other.event_name()
                        ),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Err(Error::SignalingError(
                "Relay closed the connection during handshake".to_string(),
            ))
        };

        let local_id = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| Error::SignalingError("Relay handshake timed out".to_string()))??;

        info!(local_id = %local_id, "Connected to signaling server");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, out_rx));
        tokio::spawn(Self::receiver_task(read, in_tx));

        Ok(SignalingLink::new(local_id, SignalSender::new(out_tx), in_rx))
    }
}
