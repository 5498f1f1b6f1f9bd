//! Seam between the negotiation engine and the RTC implementation
//!
//! The engine never registers callbacks itself. A backend is handed a
//! `TransportEventSink` when a connection is opened and reports local
//! candidates, remote tracks and connectivity changes through it; the
//! session drains those events alongside signaling traffic.

use crate::media::{LocalTrack, MediaKind};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Aggregate health of the direct transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Nothing attempted yet
    New,
    /// Connectivity checks in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Path lost, may recover on its own
    Disconnected,
    /// No usable path; terminal
    Failed,
    /// Closed locally
    Closed,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Inbound media track announced by the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Media kind
    pub kind: MediaKind,
    /// Remote track id
    pub track_id: String,
    /// Remote stream id
    pub stream_id: String,
}

/// What happened on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// A local candidate was gathered; `None` marks end of gathering
    LocalCandidate(Option<IceCandidate>),
    /// The remote side added a track
    RemoteTrack(RemoteTrack),
    /// Connectivity changed
    ConnectivityChanged(ConnectivityState),
}

/// Transport event tagged with the transport generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Generation of the emitting transport
    pub generation: u64,
    /// The event
    pub kind: TransportEventKind,
}

/// Where a connection reports its events
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSink {
    /// Sink stamping events with `generation`
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink stamps on events
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns `false` once nobody is listening
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// Factory for peer connections
#[async_trait]
pub trait RtcBackend: Send + Sync {
    /// Open a connection using `ice_servers` for path discovery
    async fn open(
        &self,
        ice_servers: &[String],
        sink: TransportEventSink,
    ) -> Result<Arc<dyn RtcConnection>>;
}

/// One peer connection
///
/// Gathering of local candidates starts when a local description is set;
/// each candidate is reported through the sink given to `RtcBackend::open`.
#[async_trait]
pub trait RtcConnection: Send + Sync {
    /// Attach a local track for sending
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()>;

    /// Generate an offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Add a remote candidate; the remote description must already be set
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the connection; calling it again is a no-op
    async fn close(&self) -> Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}
