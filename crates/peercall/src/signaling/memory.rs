//! In-process relay
//!
//! Implements the relay side of the protocol for clients living in the same
//! process: first-come pairing on `find_peer`, forwarding of offers, answers
//! and candidates between partners, and `peer_disconnected` when a client's
//! link is dropped.

use super::link::{SignalSender, SignalingConnector, SignalingLink};
use super::protocol::{ConnectionId, SignalingMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type ClientRx = mpsc::UnboundedReceiver<SignalingMessage>;

/// Registered client: the channel towards its link plus a registration token
struct Client {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    token: u64,
}

#[derive(Default)]
struct RelayState {
    clients: HashMap<ConnectionId, Client>,
    waiting: Option<ConnectionId>,
    partners: HashMap<ConnectionId, ConnectionId>,
    next_token: u64,
}

impl RelayState {
    fn deliver(&self, to: &ConnectionId, msg: SignalingMessage) {
        match self.clients.get(to) {
            Some(client) => {
                if client.tx.send(msg).is_err() {
                    debug!(client = %to, "Dropping message for closed client");
                }
            }
            None => debug!(client = %to, "Dropping {} for unknown client", msg.event_name()),
        }
    }

    fn find_peer(&mut self, id: &ConnectionId) {
        if self.partners.contains_key(id) {
            warn!(client = %id, "find_peer from a client that is already paired");
            return;
        }

        match self.waiting.take() {
            Some(other) if &other != id && self.clients.contains_key(&other) => {
                info!(a = %other, b = %id, "Paired clients");
                self.partners.insert(other.clone(), id.clone());
                self.partners.insert(id.clone(), other.clone());
                self.deliver(
                    &other,
                    SignalingMessage::PeerFound {
                        peer_id: id.clone(),
                    },
                );
                self.deliver(id, SignalingMessage::PeerFound { peer_id: other });
            }
            _ => {
                debug!(client = %id, "Client waiting for a peer");
                self.waiting = Some(id.clone());
            }
        }
    }

    fn stop_finding_peer(&mut self, id: &ConnectionId) {
        if self.waiting.as_ref() == Some(id) {
            self.waiting = None;
            debug!(client = %id, "Client stopped waiting");
        }
    }

    fn forward(&self, from: &ConnectionId, msg: SignalingMessage) {
        match self.partners.get(from) {
            Some(partner) => self.deliver(partner, msg),
            None => warn!(client = %from, "Dropping {} from unpaired client", msg.event_name()),
        }
    }

    fn remove(&mut self, id: &ConnectionId, token: u64) {
        // A newer registration under the same id owns the slot now
        if self.clients.get(id).map(|c| c.token) != Some(token) {
            return;
        }

        self.clients.remove(id);
        if self.waiting.as_ref() == Some(id) {
            self.waiting = None;
        }
        if let Some(partner) = self.partners.remove(id) {
            self.partners.remove(&partner);
            info!(client = %id, partner = %partner, "Client left, notifying partner");
            self.deliver(&partner, SignalingMessage::PeerDisconnected);
        } else {
            debug!(client = %id, "Client left");
        }
    }
}

/// Relay shared by every connector it hands out
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that gets a random identity on every connect
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            relay: self.clone(),
            fixed_id: None,
        }
    }

    /// Connector that always connects as `id`
    pub fn connector_with_id(&self, id: impl Into<ConnectionId>) -> MemoryConnector {
        MemoryConnector {
            relay: self.clone(),
            fixed_id: Some(id.into()),
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Client currently waiting for a match, if any
    pub fn waiting(&self) -> Option<ConnectionId> {
        self.state.lock().waiting.clone()
    }

    /// Partner of `id`, if paired
    pub fn partner_of(&self, id: &ConnectionId) -> Option<ConnectionId> {
        self.state.lock().partners.get(id).cloned()
    }

    fn register(&self, id: ConnectionId) -> Result<(SignalingLink, u64, ClientRx)> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock();
        if let Some(existing) = state.clients.get(&id) {
            if !existing.tx.is_closed() {
                return Err(Error::SignalingError(format!(
                    "Client id {} is already connected",
                    id
                )));
            }
            // The previous link is gone but its route task has not run yet
            let stale = existing.token;
            state.remove(&id, stale);
        }

        state.next_token += 1;
        let token = state.next_token;
        state.clients.insert(
            id.clone(),
            Client {
                tx: to_client_tx,
                token,
            },
        );
        drop(state);

        let link = SignalingLink::new(id, SignalSender::new(from_client_tx), to_client_rx);
        Ok((link, token, from_client_rx))
    }

    /// Drive one client's outbound messages until its link is dropped
    async fn route(self, id: ConnectionId, token: u64, mut rx: ClientRx) {
        while let Some(msg) = rx.recv().await {
            let mut state = self.state.lock();
            match msg {
                SignalingMessage::FindPeer => state.find_peer(&id),
                SignalingMessage::StopFindingPeer => state.stop_finding_peer(&id),
                msg @ (SignalingMessage::Offer { .. }
                | SignalingMessage::Answer { .. }
                | SignalingMessage::IceCandidate { .. }) => state.forward(&id, msg),
                other => warn!(client = %id, "Ignoring {} sent by a client", other.event_name()),
            }
        }

        self.state.lock().remove(&id, token);
    }
}

/// Connector bound to a `MemoryRelay`
#[derive(Clone)]
pub struct MemoryConnector {
    relay: MemoryRelay,
    fixed_id: Option<ConnectionId>,
}

#[async_trait]
impl SignalingConnector for MemoryConnector {
    async fn connect(&self) -> Result<SignalingLink> {
        let id = self.fixed_id.clone().unwrap_or_else(ConnectionId::random);
        let (link, token, rx) = self.relay.register(id.clone())?;

        debug!(client = %id, "Client connected to in-memory relay");
        tokio::spawn(self.relay.clone().route(id, token, rx));

        Ok(link)
    }
}
