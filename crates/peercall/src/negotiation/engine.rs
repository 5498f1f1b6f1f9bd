//! Negotiation engine: owns the peer transport and sequences the
//! offer/answer/candidate exchange
//!
//! Operations return the signaling message to send (if any) instead of
//! sending it themselves; the session forwards it over its current link.
//! Transport events arrive separately through the channel returned by
//! `NegotiationEngine::new` and are fed back with `on_transport_event`.

use super::backend::{
    ConnectivityState, RemoteTrack, RtcBackend, RtcConnection, TransportEvent,
    TransportEventKind, TransportEventSink,
};
use super::role::Role;
use super::transport::{NegotiationState, PeerTransport};
use crate::media::MediaCaptureHandle;
use crate::signaling::{
    IceCandidate, LocalIdentity, PeerIdentity, SdpType, SessionDescription, SignalingMessage,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Upper bound on remote candidates held before they can be applied
const MAX_PENDING_CANDIDATES: usize = 64;

/// What the session should do with a transport event
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// Send this message to the peer
    Emit(SignalingMessage),
    /// Connectivity of the live transport changed
    Connectivity(ConnectivityState),
    /// The peer added a media track
    RemoteTrack(RemoteTrack),
}

/// Owner of the (at most one) live `PeerTransport`
pub struct NegotiationEngine {
    backend: Arc<dyn RtcBackend>,
    ice_servers: Vec<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    transport: Option<PeerTransport>,
    /// Remote candidates that arrived before any transport existed
    orphan_candidates: Vec<IceCandidate>,
    next_generation: u64,
}

impl NegotiationEngine {
    /// Create an engine and the receiver its transports report into
    pub fn new(
        backend: Arc<dyn RtcBackend>,
        ice_servers: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Self {
            backend,
            ice_servers,
            events,
            transport: None,
            orphan_candidates: Vec::new(),
            next_generation: 0,
        };
        (engine, rx)
    }

    /// The live transport, if any
    pub fn transport(&self) -> Option<&PeerTransport> {
        self.transport.as_ref()
    }

    /// Whether a transport is live
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Negotiation state of the live transport
    pub fn state(&self) -> Option<NegotiationState> {
        self.transport.as_ref().map(|t| t.state())
    }

    /// Create the transport for a pairing if none exists
    ///
    /// Calling this again for the same peer is a no-op. A transport created
    /// earlier by a remote offer (peer still unknown) is bound to `peer`.
    /// When the local side is the offerer the offer is produced, applied
    /// and returned for sending.
    #[instrument(skip(self, local, peer, media), fields(local_id = %local, peer_id = %peer))]
    pub async fn create_transport(
        &mut self,
        local: &LocalIdentity,
        peer: &PeerIdentity,
        media: Option<&MediaCaptureHandle>,
    ) -> Result<Option<SignalingMessage>> {
        let role = Role::for_pair(local, peer)?;

        if let Some(transport) = self.transport.as_mut() {
            return match transport.peer() {
                Some(bound) if bound == peer => {
                    debug!("Transport already exists for peer, ignoring");
                    Ok(None)
                }
                Some(bound) => Err(Error::InvalidState(format!(
                    "transport is bound to {}, not {}",
                    bound, peer
                ))),
                None => {
                    if role.is_offerer() {
                        warn!("Remote offer arrived although the local side should offer");
                    }
                    transport.bind_peer(peer.clone());
                    Ok(None)
                }
            };
        }

        info!(role = %role, "Creating peer transport");
        self.open_transport(Some(peer.clone()), role, media).await?;

        if role.is_offerer() {
            self.send_offer().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Apply a remote offer and produce the answer
    ///
    /// Creates the transport first if the offer beat the local pairing
    /// event. An offer on an established transport is a renegotiation and
    /// keeps the established state.
    #[instrument(skip(self, media, sdp))]
    pub async fn handle_remote_offer(
        &mut self,
        peer: Option<&PeerIdentity>,
        media: Option<&MediaCaptureHandle>,
        sdp: SessionDescription,
    ) -> Result<SignalingMessage> {
        if sdp.kind != SdpType::Offer {
            return Err(Error::SdpError(format!(
                "expected an offer, got {:?}",
                sdp.kind
            )));
        }

        if self.transport.is_none() {
            info!("Remote offer before pairing, creating peer transport");
            self.open_transport(peer.cloned(), Role::Answerer, media)
                .await?;
        }

        let (connection, generation, was_established) = {
            let transport = self.live_transport()?;
            if transport.state() == NegotiationState::OfferSent {
                return Err(Error::SdpError(
                    "remote offer while the local offer is pending".to_string(),
                ));
            }
            (
                transport.connection(),
                transport.generation(),
                transport.state() == NegotiationState::ConnectivityEstablished,
            )
        };

        connection.set_remote_description(sdp.clone()).await?;
        {
            let transport = self.transport_for(generation)?;
            transport.set_remote_description(sdp);
            if !was_established {
                transport.advance(NegotiationState::OfferReceived);
            }
        }

        self.flush_pending_candidates(generation).await?;

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;

        // The connection may have been closed while the answer was produced
        let transport = self.transport_for(generation)?;
        transport.set_local_description(answer.clone());
        if was_established {
            debug!("Renegotiation complete");
        } else {
            transport.advance(NegotiationState::AnswerExchanged);
        }

        Ok(SignalingMessage::Answer { sdp: answer })
    }

    /// Apply the remote answer to the pending local offer
    #[instrument(skip(self, sdp))]
    pub async fn handle_remote_answer(&mut self, sdp: SessionDescription) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::NoActiveTransport)?;

        if sdp.kind != SdpType::Answer {
            return Err(Error::SdpError(format!(
                "expected an answer, got {:?}",
                sdp.kind
            )));
        }
        if transport.state() != NegotiationState::OfferSent {
            return Err(Error::SdpError(format!(
                "answer received in state {}",
                transport.state()
            )));
        }

        let connection = transport.connection();
        let generation = transport.generation();

        connection.set_remote_description(sdp.clone()).await?;
        {
            let transport = self.transport_for(generation)?;
            transport.set_remote_description(sdp);
            transport.advance(NegotiationState::AnswerExchanged);
        }

        self.flush_pending_candidates(generation).await
    }

    /// Add a remote candidate, buffering it until it can be applied
    ///
    /// `None` (or an empty candidate line) marks end-of-candidates and is a
    /// no-op.
    pub async fn handle_remote_candidate(&mut self, candidate: Option<IceCandidate>) -> Result<()> {
        let candidate = match candidate {
            Some(c) if !c.is_end_of_candidates() => c,
            _ => {
                debug!("Remote end-of-candidates");
                return Ok(());
            }
        };

        let Some(transport) = self.transport.as_mut() else {
            if self.orphan_candidates.len() >= MAX_PENDING_CANDIDATES {
                warn!("Dropping remote candidate, no transport and buffer full");
            } else {
                debug!("Buffering remote candidate until a transport exists");
                self.orphan_candidates.push(candidate);
            }
            return Ok(());
        };

        if transport.remote_description().is_none() {
            if transport.pending_remote_candidates().len() >= MAX_PENDING_CANDIDATES {
                warn!("Dropping remote candidate, pending buffer full");
            } else {
                debug!("Buffering remote candidate until the remote description is set");
                transport.buffer_remote_candidate(candidate);
            }
            return Ok(());
        }

        let connection = transport.connection();
        let generation = transport.generation();
        Self::apply_candidate(connection.as_ref(), &candidate).await?;
        self.transport_for(generation)?.record_applied_candidate();
        Ok(())
    }

    /// Fold a transport event into the engine state
    ///
    /// Events from transports that have since been torn down are dropped.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Option<EngineOutput> {
        let transport = match self.transport.as_mut() {
            Some(t) if t.generation() == event.generation => t,
            _ => {
                debug!(
                    generation = event.generation,
                    "Dropping event from stale transport"
                );
                return None;
            }
        };

        match event.kind {
            TransportEventKind::LocalCandidate(Some(candidate)) => {
                transport.record_local_candidate(candidate.clone());
                Some(EngineOutput::Emit(SignalingMessage::IceCandidate {
                    candidate: Some(candidate),
                }))
            }
            TransportEventKind::LocalCandidate(None) => {
                debug!(
                    gathered = transport.local_candidates().len(),
                    "Local candidate gathering complete"
                );
                None
            }
            TransportEventKind::RemoteTrack(track) => {
                info!(kind = %track.kind, track_id = %track.track_id, "Remote track added");
                Some(EngineOutput::RemoteTrack(track))
            }
            TransportEventKind::ConnectivityChanged(state) => {
                if transport.connectivity() == state {
                    return None;
                }
                info!(connectivity = %state, "Connectivity changed");
                transport.set_connectivity(state);
                match state {
                    ConnectivityState::Connected => {
                        transport.advance(NegotiationState::ConnectivityEstablished)
                    }
                    ConnectivityState::Failed => transport.advance(NegotiationState::Failed),
                    _ => {}
                }
                Some(EngineOutput::Connectivity(state))
            }
        }
    }

    /// Close the transport and clear all negotiation state
    ///
    /// Safe to call at any time, any number of times; close errors are
    /// logged, never returned.
    pub async fn teardown(&mut self) {
        self.orphan_candidates.clear();

        let Some(mut transport) = self.transport.take() else {
            return;
        };

        info!(generation = transport.generation(), "Tearing down peer transport");
        transport.advance(NegotiationState::Closed);
        transport.clear();

        if let Err(e) = transport.connection().close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }

    async fn open_transport(
        &mut self,
        peer: Option<PeerIdentity>,
        role: Role,
        media: Option<&MediaCaptureHandle>,
    ) -> Result<()> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = TransportEventSink::new(generation, self.events.clone());

        let connection = self.backend.open(&self.ice_servers, sink).await?;

        let mut attached = Vec::new();
        for track in media.map(|m| m.tracks()).unwrap_or_default() {
            if let Err(e) = connection.add_track(Arc::clone(track)).await {
                if let Err(close_err) = connection.close().await {
                    warn!("Failed to close peer connection: {}", close_err);
                }
                return Err(e);
            }
            attached.push(track.id().to_string());
        }

        debug!(generation, tracks = attached.len(), "Peer transport created");

        let mut transport = PeerTransport::new(generation, peer, role, connection, attached);
        for candidate in self.orphan_candidates.drain(..) {
            transport.buffer_remote_candidate(candidate);
        }
        self.transport = Some(transport);
        Ok(())
    }

    async fn send_offer(&mut self) -> Result<SignalingMessage> {
        let (connection, generation) = {
            let transport = self.live_transport()?;
            (transport.connection(), transport.generation())
        };

        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;

        let transport = self.transport_for(generation)?;
        transport.set_local_description(offer.clone());
        transport.advance(NegotiationState::OfferSent);

        Ok(SignalingMessage::Offer { sdp: offer })
    }

    async fn flush_pending_candidates(&mut self, generation: u64) -> Result<()> {
        let (connection, pending) = {
            let transport = self.transport_for(generation)?;
            (transport.connection(), transport.take_pending_remote_candidates())
        };

        if !pending.is_empty() {
            debug!(count = pending.len(), "Applying buffered remote candidates");
        }

        for candidate in pending {
            match Self::apply_candidate(connection.as_ref(), &candidate).await {
                Ok(()) => self.transport_for(generation)?.record_applied_candidate(),
                Err(e) => warn!("Failed to apply buffered candidate: {}", e),
            }
        }
        Ok(())
    }

    async fn apply_candidate(
        connection: &dyn RtcConnection,
        candidate: &IceCandidate,
    ) -> Result<()> {
        connection
            .add_ice_candidate(candidate.clone())
            .await
            .map_err(|e| match e {
                Error::IceCandidateError(_) => e,
                other => Error::IceCandidateError(other.to_string()),
            })
    }

    fn live_transport(&mut self) -> Result<&mut PeerTransport> {
        self.transport.as_mut().ok_or(Error::NoActiveTransport)
    }

    /// The transport of `generation`, provided it is still open
    fn transport_for(&mut self, generation: u64) -> Result<&mut PeerTransport> {
        match self.transport.as_mut() {
            Some(t) if t.is_live(generation) => Ok(t),
            Some(_) => Err(Error::ConnectivityFailed(
                "peer transport closed during negotiation".to_string(),
            )),
            None => Err(Error::NoActiveTransport),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::testing::ScriptedBackend;
    use tokio_test::{assert_err, assert_ok};

    fn engine() -> (
        NegotiationEngine,
        mpsc::UnboundedReceiver<TransportEvent>,
        Arc<ScriptedBackend>,
    ) {
        let backend = Arc::new(ScriptedBackend::new());
        let (engine, rx) = NegotiationEngine::new(
            backend.clone(),
            vec![crate::config::DEFAULT_STUN_SERVER.to_string()],
        );
        (engine, rx, backend)
    }

    fn media() -> MediaCaptureHandle {
        MediaCaptureHandle::new(&[MediaKind::Audio, MediaKind::Video])
    }

    fn drain(
        engine: &mut NegotiationEngine,
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Vec<EngineOutput> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.extend(engine.on_transport_event(event));
        }
        out
    }

    fn candidates(out: &[EngineOutput]) -> Vec<IceCandidate> {
        out.iter()
            .filter_map(|o| match o {
                EngineOutput::Emit(SignalingMessage::IceCandidate { candidate }) => {
                    candidate.clone()
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_offerer_creates_offer_with_tracks() {
        let (mut engine, _rx, backend) = engine();
        let media = media();

        let msg = assert_ok!(
            engine
                .create_transport(&"aa".into(), &"bb".into(), Some(&media))
                .await
        );
        let sdp = match msg {
            Some(SignalingMessage::Offer { sdp }) => sdp,
            other => panic!("expected an offer, got {:?}", other),
        };
        assert_eq!(sdp.kind, SdpType::Offer);
        assert!(sdp.sdp.contains("m=audio"));
        assert!(sdp.sdp.contains("m=video"));

        let transport = engine.transport().unwrap();
        assert_eq!(transport.state(), NegotiationState::OfferSent);
        assert_eq!(transport.role(), Role::Offerer);
        assert_eq!(transport.attached_tracks().len(), 2);
        assert_eq!(backend.last_connection().unwrap().track_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_answerer_waits() {
        let (mut engine, _rx, backend) = engine();
        let msg = assert_ok!(
            engine
                .create_transport(&"bb".into(), &"aa".into(), Some(&media()))
                .await
        );
        assert!(msg.is_none());
        assert_eq!(engine.state(), Some(NegotiationState::Created));
        assert_eq!(backend.last_connection().unwrap().offers_created(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_noop() {
        let (mut engine, _rx, backend) = engine();
        let media = media();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media))
            .await
            .unwrap();
        let again = engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media))
            .await
            .unwrap();

        assert!(again.is_none());
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.last_connection().unwrap().offers_created(), 1);

        let err = assert_err!(
            engine
                .create_transport(&"aa".into(), &"cc".into(), Some(&media))
                .await
        );
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_offer_before_pairing_creates_transport() {
        let (mut engine, _rx, backend) = engine();
        let media = media();
        let offer = SessionDescription::offer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 96\r\n");

        let answer = assert_ok!(engine.handle_remote_offer(None, Some(&media), offer).await);
        assert!(matches!(answer, SignalingMessage::Answer { .. }));
        assert_eq!(engine.state(), Some(NegotiationState::AnswerExchanged));
        assert!(engine.transport().unwrap().peer().is_none());

        // The late peer_found binds the peer without a second transport
        let msg = engine
            .create_transport(&"bb".into(), &"aa".into(), Some(&media))
            .await
            .unwrap();
        assert!(msg.is_none());
        assert_eq!(backend.opened(), 1);
        assert_eq!(
            engine.transport().unwrap().peer(),
            Some(&PeerIdentity::from("aa"))
        );
    }

    #[tokio::test]
    async fn test_answer_without_transport() {
        let (mut engine, _rx, _backend) = engine();
        let err = assert_err!(
            engine
                .handle_remote_answer(SessionDescription::answer("v=0"))
                .await
        );
        assert!(matches!(err, Error::NoActiveTransport));
        assert!(err.ends_pairing());
    }

    #[tokio::test]
    async fn test_candidates_before_answer_are_buffered() {
        let (mut engine, mut rx, backend) = engine();
        let media = media();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media))
            .await
            .unwrap();

        let local = candidates(&drain(&mut engine, &mut rx));
        assert_eq!(local.len(), 2);

        engine
            .handle_remote_candidate(Some(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 1 typ host")))
            .await
            .unwrap();
        engine
            .handle_remote_candidate(Some(IceCandidate::new("candidate:2 1 udp 1 10.0.0.1 2 typ host")))
            .await
            .unwrap();
        assert_eq!(engine.transport().unwrap().pending_remote_candidates().len(), 2);

        engine
            .handle_remote_answer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap();
        let transport = engine.transport().unwrap();
        assert!(transport.pending_remote_candidates().is_empty());
        assert_eq!(transport.applied_remote_candidates(), 2);
        assert_eq!(backend.last_connection().unwrap().remote_candidates().len(), 2);

        let out = drain(&mut engine, &mut rx);
        assert!(out.contains(&EngineOutput::Connectivity(ConnectivityState::Connected)));
        assert_eq!(
            engine.state(),
            Some(NegotiationState::ConnectivityEstablished)
        );
    }

    #[tokio::test]
    async fn test_end_of_candidates_is_noop() {
        let (mut engine, _rx, _backend) = engine();
        assert_ok!(engine.handle_remote_candidate(None).await);
        assert_ok!(engine.handle_remote_candidate(Some(IceCandidate::new(""))).await);
        assert!(!engine.has_transport());
    }

    #[tokio::test]
    async fn test_answer_in_wrong_state() {
        let (mut engine, _rx, _backend) = engine();
        engine
            .create_transport(&"bb".into(), &"aa".into(), Some(&media()))
            .await
            .unwrap();

        let err = assert_err!(
            engine
                .handle_remote_answer(SessionDescription::answer("v=0"))
                .await
        );
        assert!(matches!(err, Error::SdpError(_)));
    }

    #[tokio::test]
    async fn test_failed_connectivity() {
        let (mut engine, mut rx, backend) = engine();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media()))
            .await
            .unwrap();
        drain(&mut engine, &mut rx);

        backend
            .last_connection()
            .unwrap()
            .report_connectivity(ConnectivityState::Failed);
        let out = drain(&mut engine, &mut rx);
        assert_eq!(
            out,
            vec![EngineOutput::Connectivity(ConnectivityState::Failed)]
        );
        assert_eq!(engine.state(), Some(NegotiationState::Failed));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut engine, mut rx, backend) = engine();

        // Nothing to tear down
        engine.teardown().await;

        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media()))
            .await
            .unwrap();
        engine.teardown().await;
        engine.teardown().await;

        assert!(!engine.has_transport());
        assert!(backend.last_connection().unwrap().is_closed());

        // Events queued by the closed transport are stale now
        assert!(drain(&mut engine, &mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_new_transport_after_teardown_gets_new_generation() {
        let (mut engine, _rx, _backend) = engine();
        let media = media();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media))
            .await
            .unwrap();
        let first = engine.transport().unwrap().generation();
        engine.teardown().await;

        engine
            .create_transport(&"aa".into(), &"cc".into(), Some(&media))
            .await
            .unwrap();
        assert!(engine.transport().unwrap().generation() > first);
    }

    fn remote_candidate(n: u32) -> Option<IceCandidate> {
        Some(IceCandidate::new(format!(
            "candidate:{} 1 udp 1 10.0.0.2 {} typ host",
            n,
            40000 + n
        )))
    }

    fn remote_offer() -> SessionDescription {
        SessionDescription::offer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 96\r\n")
    }

    #[tokio::test]
    async fn test_renegotiation_keeps_established_state() {
        let (mut engine, mut rx, backend) = engine();
        let media = media();
        engine
            .create_transport(&"bb".into(), &"aa".into(), Some(&media))
            .await
            .unwrap();
        engine
            .handle_remote_offer(Some(&"aa".into()), Some(&media), remote_offer())
            .await
            .unwrap();
        engine.handle_remote_candidate(remote_candidate(1)).await.unwrap();
        drain(&mut engine, &mut rx);
        assert_eq!(
            engine.state(),
            Some(NegotiationState::ConnectivityEstablished)
        );
        assert!(engine.transport().unwrap().connection_duration().is_some());

        let answer = assert_ok!(
            engine
                .handle_remote_offer(Some(&"aa".into()), Some(&media), remote_offer())
                .await
        );
        assert!(matches!(answer, SignalingMessage::Answer { .. }));
        assert_eq!(
            engine.state(),
            Some(NegotiationState::ConnectivityEstablished)
        );
        assert_eq!(backend.opened(), 1);
        assert_eq!(backend.last_connection().unwrap().answers_created(), 2);
    }

    #[tokio::test]
    async fn test_offer_while_offer_pending_is_rejected() {
        let (mut engine, _rx, backend) = engine();
        let media = media();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media))
            .await
            .unwrap();

        let err = assert_err!(
            engine
                .handle_remote_offer(Some(&"bb".into()), Some(&media), remote_offer())
                .await
        );
        assert!(matches!(err, Error::SdpError(_)));
        assert!(err.ends_pairing());
        assert_eq!(engine.state(), Some(NegotiationState::OfferSent));
        assert!(backend.last_connection().unwrap().remote_description().is_none());
    }

    #[tokio::test]
    async fn test_candidates_before_transport_are_adopted() {
        let (mut engine, _rx, backend) = engine();
        let media = media();

        engine.handle_remote_candidate(remote_candidate(1)).await.unwrap();
        engine.handle_remote_candidate(remote_candidate(2)).await.unwrap();
        assert!(!engine.has_transport());

        engine
            .create_transport(&"bb".into(), &"aa".into(), Some(&media))
            .await
            .unwrap();
        assert_eq!(engine.transport().unwrap().pending_remote_candidates().len(), 2);
        assert!(backend.last_connection().unwrap().remote_candidates().is_empty());

        engine
            .handle_remote_offer(Some(&"aa".into()), Some(&media), remote_offer())
            .await
            .unwrap();
        let transport = engine.transport().unwrap();
        assert!(transport.pending_remote_candidates().is_empty());
        assert_eq!(transport.applied_remote_candidates(), 2);
        assert_eq!(backend.last_connection().unwrap().remote_candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_discards_candidates_without_transport() {
        let (mut engine, _rx, _backend) = engine();
        engine.handle_remote_candidate(remote_candidate(1)).await.unwrap();
        engine.teardown().await;

        engine
            .create_transport(&"bb".into(), &"cc".into(), Some(&media()))
            .await
            .unwrap();
        assert!(engine.transport().unwrap().pending_remote_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_pending_candidates_are_capped() {
        let (mut engine, _rx, _backend) = engine();
        for n in 0..(MAX_PENDING_CANDIDATES as u32 + 6) {
            engine.handle_remote_candidate(remote_candidate(n)).await.unwrap();
        }

        engine
            .create_transport(&"bb".into(), &"aa".into(), Some(&media()))
            .await
            .unwrap();
        assert_eq!(
            engine.transport().unwrap().pending_remote_candidates().len(),
            MAX_PENDING_CANDIDATES
        );

        // Still waiting for the remote description; the buffer stays full
        for n in 100..110 {
            assert_ok!(engine.handle_remote_candidate(remote_candidate(n)).await);
        }
        let pending = engine.transport().unwrap().pending_remote_candidates();
        assert_eq!(pending.len(), MAX_PENDING_CANDIDATES);
        assert!(pending
            .iter()
            .all(|c| !c.candidate.contains("10.0.0.2 4010")));
    }

    #[tokio::test]
    async fn test_candidate_on_failed_transport_is_not_recorded() {
        let (mut engine, mut rx, backend) = engine();
        engine
            .create_transport(&"aa".into(), &"bb".into(), Some(&media()))
            .await
            .unwrap();
        engine
            .handle_remote_answer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap();
        drain(&mut engine, &mut rx);

        backend
            .last_connection()
            .unwrap()
            .report_connectivity(ConnectivityState::Failed);
        drain(&mut engine, &mut rx);
        assert_eq!(engine.state(), Some(NegotiationState::Failed));

        let err = assert_err!(engine.handle_remote_candidate(remote_candidate(1)).await);
        assert!(matches!(err, Error::ConnectivityFailed(_)));
        assert_eq!(engine.transport().unwrap().applied_remote_candidates(), 0);
    }
}
