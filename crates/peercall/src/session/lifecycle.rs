//! The call session aggregate and its event loop

use super::handle::SessionHandle;
use super::state::{Command, EndReason, SessionNotice, SessionState};
use crate::config::CallConfig;
use crate::media::{CaptureDevices, MediaCaptureHandle, MediaKind, MediaSource};
use crate::negotiation::{
    ConnectivityState, EngineOutput, NegotiationEngine, RtcBackend, TransportEvent,
};
use crate::signaling::{
    LocalIdentity, PeerIdentity, SignalingConnector, SignalingLink, SignalingMessage,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the notice channel; slow subscribers lose the oldest notices
const NOTICE_CAPACITY: usize = 256;

/// One event taken off the loop's inputs
enum Incoming {
    Command(Command),
    Signal(Option<SignalingMessage>),
    Transport(TransportEvent),
    HandlesGone,
}

/// Owns everything one call needs: media, the negotiation engine, the
/// relay link and the current pairing
///
/// All state changes happen on `&mut self`, one event at a time.
pub struct Session {
    config: CallConfig,
    state: SessionState,
    media: MediaSource,
    engine: NegotiationEngine,
    connector: Arc<dyn SignalingConnector>,
    link: Option<SignalingLink>,
    peer_id: Option<PeerIdentity>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    notices: broadcast::Sender<SessionNotice>,
    end_reason: Option<EndReason>,
}

impl Session {
    /// Create an idle session
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(
        config: CallConfig,
        devices: Arc<dyn CaptureDevices>,
        connector: Arc<dyn SignalingConnector>,
        backend: Arc<dyn RtcBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let (engine, transport_events) = NegotiationEngine::new(backend, config.ice_servers.clone());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Ok(Self {
            config,
            state: SessionState::Idle,
            media: MediaSource::new(devices),
            engine,
            connector,
            link: None,
            peer_id: None,
            transport_events,
            notices,
            end_reason: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Identity of the current relay connection
    pub fn local_id(&self) -> Option<&LocalIdentity> {
        self.link.as_ref().map(|l| l.local_id())
    }

    /// Identity of the current peer
    pub fn peer_id(&self) -> Option<&PeerIdentity> {
        self.peer_id.as_ref()
    }

    /// Live capture handle, for local preview
    pub fn local_media(&self) -> Option<&MediaCaptureHandle> {
        self.media.handle()
    }

    /// Negotiation engine, for inspection
    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    /// Why the last call ended
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    /// Subscribe to notices
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// A handle plus the command receiver to pass to `run`
    pub fn handle(&self) -> (SessionHandle, mpsc::UnboundedReceiver<Command>) {
        SessionHandle::channel(self.notices.clone())
    }

    /// Run the session on its own task
    ///
    /// The task returns the session once the loop stops.
    pub fn spawn(mut self) -> (SessionHandle, JoinHandle<Session>) {
        let (handle, commands) = self.handle();
        let task = tokio::spawn(async move {
            self.run(commands).await;
            self
        });
        (handle, task)
    }

    /// Acquire media, connect to the relay and ask for a peer
    ///
    /// On failure the session stays `Idle` with nothing acquired; no
    /// `find_peer` is sent.
    #[instrument(skip(self))]
    pub async fn request_permissions(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot request permissions while {}",
                self.state
            )));
        }

        let acquired = self.media.acquire(&self.config.capture).await.map(|_| ());
        if let Err(e) = acquired {
            if e.is_acquisition_error() {
                self.notify(SessionNotice::PermissionDenied(e.to_string()));
            }
            return Err(e);
        }

        let link = match self.connector.connect().await {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to connect to signaling server: {}", e);
                self.abandon_attempt().await;
                return Err(e);
            }
        };
        let local_id = link.local_id().clone();
        self.notify(SessionNotice::SignalingConnected(local_id.clone()));

        if let Err(e) = link.send(SignalingMessage::FindPeer) {
            self.abandon_attempt().await;
            return Err(e);
        }
        self.link = Some(link);

        info!(local_id = %local_id, "Looking for peer");
        self.transition(SessionState::Searching);
        self.notify(SessionNotice::Searching);
        Ok(())
    }

    /// Cancel the search and return to `Idle`
    pub async fn stop_search(&mut self) -> Result<()> {
        if self.state != SessionState::Searching {
            return Err(Error::InvalidState(format!(
                "cannot stop searching while {}",
                self.state
            )));
        }

        if let Some(link) = self.link.take() {
            if let Err(e) = link.send(SignalingMessage::StopFindingPeer) {
                warn!("Failed to cancel search: {}", e);
            }
        }
        self.abandon_attempt().await;
        self.transition(SessionState::Idle);
        Ok(())
    }

    /// Hang up; a no-op unless a call attempt is in progress
    pub async fn end_call(&mut self) {
        if self.state.is_active() {
            self.enter_ended(EndReason::LocalEnd).await;
        } else {
            debug!(state = %self.state, "Nothing to end");
        }
    }

    /// Return to `Idle`, ending the current call first if there is one
    pub async fn reset(&mut self) {
        if self.state.is_active() {
            self.enter_ended(EndReason::LocalEnd).await;
        }
        if self.state == SessionState::Ended {
            self.end_reason = None;
            self.transition(SessionState::Idle);
        }
    }

    /// Enable or disable local tracks of `kind`; never renegotiates
    pub fn set_enabled(&mut self, kind: MediaKind, enabled: bool) -> bool {
        let applied = self.media.set_enabled(kind, enabled);
        if applied {
            self.notify(SessionNotice::MediaToggled { kind, enabled });
        }
        applied
    }

    /// Flip local tracks of `kind`, returning the new state
    pub fn toggle(&mut self, kind: MediaKind) -> Option<bool> {
        let enabled = self.media.toggle(kind)?;
        self.notify(SessionNotice::MediaToggled { kind, enabled });
        Some(enabled)
    }

    /// Apply one inbound relay message
    ///
    /// Errors that break the pairing end the call before they are returned.
    pub async fn handle_signal(&mut self, msg: SignalingMessage) -> Result<()> {
        debug!(state = %self.state, "Received signaling message: {}", msg.event_name());

        match msg {
            SignalingMessage::PeerFound { peer_id } => self.on_peer_found(peer_id).await,
            SignalingMessage::Offer { sdp } => {
                match self.state {
                    SessionState::Searching => info!("Offer received before pairing"),
                    SessionState::Negotiating | SessionState::Connected => {}
                    _ => {
                        warn!(state = %self.state, "Ignoring offer");
                        return Ok(());
                    }
                }

                let result = self
                    .engine
                    .handle_remote_offer(self.peer_id.as_ref(), self.media.handle(), sdp)
                    .await;
                match result {
                    Ok(answer) => {
                        if self.state == SessionState::Searching {
                            self.transition(SessionState::Negotiating);
                        }
                        self.send(answer).await;
                        Ok(())
                    }
                    Err(e) => Err(self.fail_pairing(e).await),
                }
            }
            SignalingMessage::Answer { sdp } => {
                if !self.state.is_active() {
                    warn!(state = %self.state, "Ignoring answer");
                    return Ok(());
                }
                match self.engine.handle_remote_answer(sdp).await {
                    Ok(()) => Ok(()),
                    Err(e) => Err(self.fail_pairing(e).await),
                }
            }
            SignalingMessage::IceCandidate { candidate } => {
                if !self.state.is_active() {
                    debug!(state = %self.state, "Ignoring candidate");
                    return Ok(());
                }
                if let Err(e) = self.engine.handle_remote_candidate(candidate).await {
                    warn!("Failed to add remote candidate: {}", e);
                }
                Ok(())
            }
            SignalingMessage::PeerDisconnected => {
                if self.state.is_active() {
                    info!("Peer disconnected");
                    self.enter_ended(EndReason::PeerGone).await;
                }
                Ok(())
            }
            other => {
                warn!("Ignoring unexpected {} message", other.event_name());
                Ok(())
            }
        }
    }

    /// Apply one event from the peer transport
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(output) = self.engine.on_transport_event(event) else {
            return;
        };

        match output {
            EngineOutput::Emit(msg) => self.send(msg).await,
            EngineOutput::RemoteTrack(track) => self.notify(SessionNotice::RemoteTrack(track)),
            EngineOutput::Connectivity(connectivity) => {
                self.notify(SessionNotice::Connectivity(connectivity));
                match connectivity {
                    ConnectivityState::Connected if self.state == SessionState::Negotiating => {
                        self.transition(SessionState::Connected);
                    }
                    ConnectivityState::Failed if self.state.is_active() => {
                        error!("Peer connection failed");
                        self.enter_ended(EndReason::ConnectivityFailed).await;
                    }
                    ConnectivityState::Disconnected => {
                        warn!("Peer connection disconnected, waiting for recovery or failure");
                    }
                    _ => {}
                }
            }
        }
    }

    /// The relay connection went away
    pub async fn handle_signaling_closed(&mut self) {
        self.link = None;
        match self.state {
            SessionState::Searching | SessionState::Negotiating => {
                error!("Signaling connection lost");
                self.enter_ended(EndReason::SignalingLost).await;
            }
            SessionState::Connected => {
                warn!("Signaling connection lost, keeping the established call");
            }
            SessionState::Idle | SessionState::Ended => {}
        }
    }

    /// Process commands, relay messages and transport events until
    /// `Shutdown` or until every handle is dropped
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Session loop started");

        loop {
            let incoming = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Incoming::Command(cmd),
                    None => Incoming::HandlesGone,
                },
                msg = next_signal(&mut self.link) => Incoming::Signal(msg),
                Some(event) = self.transport_events.recv() => Incoming::Transport(event),
            };

            match incoming {
                Incoming::Command(Command::Shutdown) | Incoming::HandlesGone => break,
                Incoming::Command(cmd) => self.apply(cmd).await,
                Incoming::Signal(Some(msg)) => {
                    if let Err(e) = self.handle_signal(msg).await {
                        warn!("Signaling message failed: {}", e);
                    }
                }
                Incoming::Signal(None) => self.handle_signaling_closed().await,
                Incoming::Transport(event) => self.handle_transport_event(event).await,
            }
        }

        self.end_call().await;
        self.media.release();
        self.link = None;
        info!("Session loop stopped");
    }

    async fn apply(&mut self, cmd: Command) {
        debug!(state = %self.state, "Command: {:?}", cmd);
        let result = match cmd {
            Command::RequestPermissions => self.request_permissions().await,
            Command::StopSearch => self.stop_search().await,
            Command::EndCall => {
                self.end_call().await;
                Ok(())
            }
            Command::Reset => {
                self.reset().await;
                Ok(())
            }
            Command::SetEnabled(kind, enabled) => {
                self.set_enabled(kind, enabled);
                Ok(())
            }
            Command::Toggle(kind) => {
                self.toggle(kind);
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("Command failed: {}", e);
        }
    }

    async fn on_peer_found(&mut self, peer_id: PeerIdentity) -> Result<()> {
        match self.state {
            SessionState::Searching => {}
            SessionState::Negotiating | SessionState::Connected => {
                match &self.peer_id {
                    Some(current) if current == &peer_id => {
                        debug!(peer_id = %peer_id, "Duplicate peer_found");
                        return Ok(());
                    }
                    Some(current) => {
                        warn!(peer_id = %peer_id, current = %current, "peer_found for another peer while paired");
                        return Ok(());
                    }
                    // Transport already created by an early offer
                    None => {}
                }
            }
            _ => {
                warn!(state = %self.state, "Ignoring peer_found");
                return Ok(());
            }
        }

        let Some(local_id) = self.local_id().cloned() else {
            return Err(Error::InvalidState("paired without a relay link".to_string()));
        };

        info!(peer_id = %peer_id, "Peer found");
        self.peer_id = Some(peer_id.clone());
        self.notify(SessionNotice::PeerFound(peer_id.clone()));

        let result = self
            .engine
            .create_transport(&local_id, &peer_id, self.media.handle())
            .await;
        let offer = match result {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_pairing(e).await),
        };

        // The transport exists from here on
        if self.state == SessionState::Searching {
            self.transition(SessionState::Negotiating);
        }
        if let Some(offer) = offer {
            self.send(offer).await;
        }
        Ok(())
    }

    /// Send to the relay; a missing link during negotiation ends the call
    async fn send(&mut self, msg: SignalingMessage) {
        let result = match &self.link {
            Some(link) => link.send(msg),
            None => Err(Error::SignalingError("not connected to the relay".to_string())),
        };

        if let Err(e) = result {
            if self.state == SessionState::Negotiating {
                error!("Failed to send signaling message: {}", e);
                self.enter_ended(EndReason::SignalingLost).await;
            } else {
                debug!("Dropping outbound message: {}", e);
            }
        }
    }

    /// End the call because of `err`, returning it for the caller
    async fn fail_pairing(&mut self, err: Error) -> Error {
        let reason = match &err {
            Error::PeerGone => EndReason::PeerGone,
            Error::ConnectivityFailed(_) => EndReason::ConnectivityFailed,
            Error::NoActiveTransport
            | Error::SdpError(_)
            | Error::InvalidState(_)
            | Error::InvalidData(_) => EndReason::ProtocolViolation(err.to_string()),
            _ => EndReason::TransportError(err.to_string()),
        };

        error!("Negotiation failed: {}", err);
        if self.state.is_active() {
            self.enter_ended(reason).await;
        }
        err
    }

    /// Drop negotiation state and media of an attempt that never paired
    async fn abandon_attempt(&mut self) {
        self.engine.teardown().await;
        self.media.release();
    }

    /// Tear everything down and move to `Ended`
    async fn enter_ended(&mut self, reason: EndReason) {
        if let Some(transport) = self.engine.transport() {
            info!(
                generation = transport.generation(),
                age = ?transport.age(),
                connected_for = ?transport.connection_duration(),
                "Closing peer transport"
            );
        }
        self.engine.teardown().await;
        self.media.release();
        self.peer_id = None;
        // Dropping the link closes the relay connection; the relay tells the peer
        self.link = None;

        info!(reason = %reason, "Call ended");
        self.end_reason = Some(reason.clone());
        self.transition(SessionState::Ended);
        self.notify(SessionNotice::Ended(reason));
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Session state transition: {} -> {}", from, to);
        self.state = to;
        self.notify(SessionNotice::StateChanged { from, to });
    }

    fn notify(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

/// Next message from the relay, pending forever while there is no link
async fn next_signal(link: &mut Option<SignalingLink>) -> Option<SignalingMessage> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}
