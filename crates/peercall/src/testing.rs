//! Test utilities
//!
//! `ScriptedBackend` stands in for a real RTC stack. It produces
//! deterministic descriptions and candidates and reports connectivity on a
//! fixed rule, so negotiation and session behaviour can be checked without
//! network access:
//! - every local description yields two host candidates, then end-of-candidates
//! - connectivity goes `connecting` -> `connected` once both descriptions are
//!   applied and at least one remote candidate has been added
//! - remote tracks are announced from the `m=`/`a=msid:` lines of the remote
//!   description

use crate::media::{LocalTrack, MediaKind};
use crate::negotiation::{
    ConnectivityState, RemoteTrack, RtcBackend, RtcConnection, TransportEventKind,
    TransportEventSink,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::track::track_local::TrackLocal;

/// Backend handing out `ScriptedConnection`s
#[derive(Default)]
pub struct ScriptedBackend {
    next_id: AtomicU64,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
    refuse: AtomicBool,
}

impl ScriptedBackend {
    /// Create a backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `open` fail with `WebRtcError`
    pub fn refuse_open(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> usize {
        self.connections.lock().len()
    }

    /// Every connection opened so far, oldest first
    pub fn connections(&self) -> Vec<Arc<ScriptedConnection>> {
        self.connections.lock().clone()
    }

    /// Most recently opened connection
    pub fn last_connection(&self) -> Option<Arc<ScriptedConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl RtcBackend for ScriptedBackend {
    async fn open(
        &self,
        ice_servers: &[String],
        sink: TransportEventSink,
    ) -> Result<Arc<dyn RtcConnection>> {
        if ice_servers.is_empty() {
            return Err(Error::InvalidConfig("no ice servers".to_string()));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::WebRtcError("peer connection refused".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Arc::new(ScriptedConnection::new(id, sink));
        self.connections.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

#[derive(Default)]
struct ScriptState {
    tracks: Vec<(MediaKind, String, String)>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    offers_created: usize,
    answers_created: usize,
    connected: bool,
}

/// Deterministic in-process connection
pub struct ScriptedConnection {
    id: u64,
    sink: TransportEventSink,
    state: Mutex<ScriptState>,
    closed: AtomicBool,
}

impl ScriptedConnection {
    fn new(id: u64, sink: TransportEventSink) -> Self {
        Self {
            id,
            sink,
            state: Mutex::new(ScriptState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Connection number within its backend, starting at 1
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ids of attached local tracks
    pub fn track_ids(&self) -> Vec<String> {
        self.state.lock().tracks.iter().map(|(_, id, _)| id.clone()).collect()
    }

    /// Applied local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Applied remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Remote candidates added, in order
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Number of offers generated
    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    /// Number of answers generated
    pub fn answers_created(&self) -> usize {
        self.state.lock().answers_created
    }

    /// Report an arbitrary connectivity change, e.g. `Failed`
    pub fn report_connectivity(&self, state: ConnectivityState) {
        self.sink.emit(TransportEventKind::ConnectivityChanged(state));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::WebRtcError("connection is closed".to_string()));
        }
        Ok(())
    }

    fn describe(&self, state: &ScriptState, kind: SdpType) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id,
            state.offers_created + state.answers_created
        );
        for (kind, track_id, stream_id) in &state.tracks {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=msid:{} {}\r\n",
                kind, stream_id, track_id
            ));
        }
        SessionDescription { kind, sdp }
    }

    fn gather(&self) {
        for n in 1..=2u64 {
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                    n,
                    50000 + self.id * 10 + n
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: Some(format!("frag{}", self.id)),
            };
            self.sink.emit(TransportEventKind::LocalCandidate(Some(candidate)));
        }
        self.sink.emit(TransportEventKind::LocalCandidate(None));
    }

    fn announce_remote_tracks(&self, desc: &SessionDescription) {
        let mut kind = None;
        for line in desc.sdp.lines() {
            if let Some(media) = line.strip_prefix("m=") {
                kind = match media.split_whitespace().next() {
                    Some("audio") => Some(MediaKind::Audio),
                    Some("video") => Some(MediaKind::Video),
                    _ => None,
                };
            } else if let (Some(k), Some(msid)) = (kind, line.strip_prefix("a=msid:")) {
                let mut parts = msid.split_whitespace();
                if let (Some(stream_id), Some(track_id)) = (parts.next(), parts.next()) {
                    self.sink.emit(TransportEventKind::RemoteTrack(RemoteTrack {
                        kind: k,
                        track_id: track_id.to_string(),
                        stream_id: stream_id.to_string(),
                    }));
                }
                kind = None;
            }
        }
    }

    fn maybe_connect(&self, state: &mut ScriptState) {
        if state.connected
            || state.local.is_none()
            || state.remote.is_none()
            || state.remote_candidates.is_empty()
        {
            return;
        }
        state.connected = true;
        self.report_connectivity(ConnectivityState::Connecting);
        self.report_connectivity(ConnectivityState::Connected);
    }
}

#[async_trait]
impl RtcConnection for ScriptedConnection {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.ensure_open()?;
        let stream_id = track.rtp_track().stream_id().to_string();
        self.state
            .lock()
            .tracks
            .push((track.kind(), track.id().to_string(), stream_id));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.offers_created += 1;
        Ok(self.describe(&state, SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match &state.remote {
            Some(remote) if remote.kind == SdpType::Offer => {}
            _ => return Err(Error::SdpError("no remote offer to answer".to_string())),
        }
        state.answers_created += 1;
        Ok(self.describe(&state, SdpType::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        {
            let mut state = self.state.lock();
            state.local = Some(desc);
            self.maybe_connect(&mut state);
        }
        self.gather();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let have_local_offer = state.remote.is_none()
            && state.local.as_ref().map(|d| d.kind) == Some(SdpType::Offer);
        match desc.kind {
            SdpType::Answer if have_local_offer => {}
            SdpType::Offer if !have_local_offer => {}
            _ => {
                return Err(Error::SdpError(format!(
                    "cannot apply remote {:?} in current signaling state",
                    desc.kind
                )))
            }
        }
        self.announce_remote_tracks(&desc);
        state.remote = Some(desc);
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::IceCandidateError(
                "remote description not set".to_string(),
            ));
        }
        state.remote_candidates.push(candidate);
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.report_connectivity(ConnectivityState::Closed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
