//! Per-pairing negotiation object

use super::backend::{ConnectivityState, RtcConnection};
use super::role::Role;
use crate::signaling::{IceCandidate, PeerIdentity, SessionDescription};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Negotiation progress of one `PeerTransport`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Connection exists, no description applied yet
    Created,
    /// Local offer applied and sent
    OfferSent,
    /// Remote offer applied, answer pending
    OfferReceived,
    /// Both descriptions applied
    AnswerExchanged,
    /// Connectivity reported `connected`
    ConnectivityEstablished,
    /// Connectivity reported `failed`
    Failed,
    /// Torn down
    Closed,
}

impl NegotiationState {
    /// Whether no further transition other than `Closed` is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Created => "created",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::AnswerExchanged => "answer-exchanged",
            NegotiationState::ConnectivityEstablished => "connectivity-established",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The live negotiation object for one pairing
pub struct PeerTransport {
    /// Generation stamped on this transport's events
    generation: u64,

    /// Bound peer; unknown while an offer arrived before `peer_found`
    peer: Option<PeerIdentity>,

    /// Local role in the pairing
    role: Role,

    /// Underlying RTC connection
    connection: Arc<dyn RtcConnection>,

    state: NegotiationState,
    connectivity: ConnectivityState,

    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,

    /// Remote candidates received before the remote description
    pending_remote_candidates: Vec<IceCandidate>,

    /// Remote candidates handed to the connection
    applied_remote_candidates: usize,

    /// Local candidates gathered (and sent) so far
    local_candidates: Vec<IceCandidate>,

    /// Ids of the local tracks attached at creation
    attached_tracks: Vec<String>,

    created_at: SystemTime,
    connected_at: Option<SystemTime>,
}

impl PeerTransport {
    pub(crate) fn new(
        generation: u64,
        peer: Option<PeerIdentity>,
        role: Role,
        connection: Arc<dyn RtcConnection>,
        attached_tracks: Vec<String>,
    ) -> Self {
        Self {
            generation,
            peer,
            role,
            connection,
            state: NegotiationState::Created,
            connectivity: ConnectivityState::New,
            local_description: None,
            remote_description: None,
            pending_remote_candidates: Vec::new(),
            applied_remote_candidates: 0,
            local_candidates: Vec::new(),
            attached_tracks,
            created_at: SystemTime::now(),
            connected_at: None,
        }
    }

    /// Move to `next`, logging the transition
    ///
    /// `Closed` is final; `Failed` only moves on to `Closed`.
    pub(crate) fn advance(&mut self, next: NegotiationState) {
        let current = self.state;
        if current == next {
            return;
        }
        if current == NegotiationState::Closed
            || (current == NegotiationState::Failed && next != NegotiationState::Closed)
        {
            warn!(
                generation = self.generation,
                "Ignoring negotiation transition {} -> {}", current, next
            );
            return;
        }

        debug!(
            generation = self.generation,
            "Negotiation state transition: {} -> {}", current, next
        );
        self.state = next;

        if next == NegotiationState::ConnectivityEstablished && self.connected_at.is_none() {
            self.connected_at = Some(SystemTime::now());
        }
    }

    pub(crate) fn connection(&self) -> Arc<dyn RtcConnection> {
        Arc::clone(&self.connection)
    }

    /// Whether this is still the open transport of `generation`
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        self.generation == generation
            && !self.state.is_terminal()
            && !self.connection.is_closed()
    }

    pub(crate) fn bind_peer(&mut self, peer: PeerIdentity) {
        debug!(generation = self.generation, peer_id = %peer, "Bound transport to peer");
        self.peer = Some(peer);
    }

    pub(crate) fn set_local_description(&mut self, desc: SessionDescription) {
        self.local_description = Some(desc);
    }

    pub(crate) fn set_remote_description(&mut self, desc: SessionDescription) {
        self.remote_description = Some(desc);
    }

    pub(crate) fn set_connectivity(&mut self, state: ConnectivityState) {
        self.connectivity = state;
    }

    pub(crate) fn buffer_remote_candidate(&mut self, candidate: IceCandidate) {
        self.pending_remote_candidates.push(candidate);
    }

    pub(crate) fn take_pending_remote_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_remote_candidates)
    }

    pub(crate) fn record_applied_candidate(&mut self) {
        self.applied_remote_candidates += 1;
    }

    pub(crate) fn record_local_candidate(&mut self, candidate: IceCandidate) {
        self.local_candidates.push(candidate);
    }

    pub(crate) fn clear(&mut self) {
        self.local_description = None;
        self.remote_description = None;
        self.pending_remote_candidates.clear();
        self.local_candidates.clear();
        self.attached_tracks.clear();
    }

    /// Generation stamped on this transport's events
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Peer this transport is bound to
    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Local role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiation state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Last reported connectivity
    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    /// Applied local description
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Applied remote description
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Remote candidates waiting for the remote description
    pub fn pending_remote_candidates(&self) -> &[IceCandidate] {
        &self.pending_remote_candidates
    }

    /// Number of remote candidates handed to the connection
    pub fn applied_remote_candidates(&self) -> usize {
        self.applied_remote_candidates
    }

    /// Local candidates gathered so far
    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local_candidates
    }

    /// Ids of the attached local tracks
    pub fn attached_tracks(&self) -> &[String] {
        &self.attached_tracks
    }

    /// Time since the transport was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// How long connectivity has been established, if it has
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_at.and_then(|at| at.elapsed().ok())
    }
}

impl fmt::Debug for PeerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerTransport")
            .field("generation", &self.generation)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("connectivity", &self.connectivity)
            .field("pending_remote_candidates", &self.pending_remote_candidates.len())
            .field("attached_tracks", &self.attached_tracks.len())
            .finish()
    }
}
