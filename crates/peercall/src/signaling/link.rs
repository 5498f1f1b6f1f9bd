//! Connector abstraction over the relay connection

use super::protocol::{LocalIdentity, SignalingMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Opens connections to the relay
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Connect and complete the relay handshake
    ///
    /// Every call opens a fresh connection and therefore yields a fresh
    /// local identity.
    async fn connect(&self) -> Result<SignalingLink>;
}

/// Outbound half of a relay connection
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalSender {
    /// Wrap the channel drained by a connector's writer task
    pub fn new(tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self { tx }
    }

    /// Queue a message for the relay
    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        debug!("Sending signaling message: {}", msg.event_name());
        self.tx
            .send(msg)
            .map_err(|e| Error::SignalingError(format!("Failed to send message: {}", e)))
    }

    /// Whether the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live relay connection
///
/// Dropping the link closes the connection; the relay then tells the
/// matched peer (if any) that we left.
#[derive(Debug)]
pub struct SignalingLink {
    local_id: LocalIdentity,
    sender: SignalSender,
    receiver: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl SignalingLink {
    /// Assemble a link from its parts
    pub fn new(
        local_id: LocalIdentity,
        sender: SignalSender,
        receiver: mpsc::UnboundedReceiver<SignalingMessage>,
    ) -> Self {
        Self {
            local_id,
            sender,
            receiver,
        }
    }

    /// Identity assigned by the relay for this connection
    pub fn local_id(&self) -> &LocalIdentity {
        &self.local_id
    }

    /// Queue a message for the relay
    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.sender.send(msg)
    }

    /// Next inbound message, `None` once the relay connection is gone
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_writer_gone_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = SignalSender::new(tx);
        assert!(sender.send(SignalingMessage::FindPeer).is_ok());

        drop(rx);
        assert!(sender.is_closed());
        let err = sender.send(SignalingMessage::FindPeer).unwrap_err();
        assert!(matches!(err, Error::SignalingError(_)));
    }

    #[tokio::test]
    async fn test_link_receives_in_order() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut link = SignalingLink::new("aa".into(), SignalSender::new(out_tx), in_rx);

        in_tx.send(SignalingMessage::FindPeer).unwrap();
        in_tx.send(SignalingMessage::PeerDisconnected).unwrap();
        drop(in_tx);

        assert_eq!(link.recv().await, Some(SignalingMessage::FindPeer));
        assert_eq!(link.recv().await, Some(SignalingMessage::PeerDisconnected));
        assert_eq!(link.recv().await, None);
        assert_eq!(link.local_id().as_str(), "aa");
    }
}
