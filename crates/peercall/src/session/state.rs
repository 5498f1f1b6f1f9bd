//! Session states, commands and notices

use crate::media::MediaKind;
use crate::negotiation::{ConnectivityState, RemoteTrack};
use crate::signaling::{LocalIdentity, PeerIdentity};
use std::fmt;

/// Lifecycle state of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing acquired, ready to request permissions
    Idle,
    /// Media acquired, waiting for the relay to pair us
    Searching,
    /// Paired (or offered to), descriptions being exchanged
    Negotiating,
    /// Direct transport established
    Connected,
    /// Call over, everything released; `reset` returns to `Idle`
    Ended,
}

impl SessionState {
    /// Whether a call attempt is in progress
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Searching | SessionState::Negotiating | SessionState::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Searching => "searching",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Why a call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The remote party left
    PeerGone,
    /// Ended from this side
    LocalEnd,
    /// The direct transport failed
    ConnectivityFailed,
    /// The peer or relay broke the negotiation sequence
    ProtocolViolation(String),
    /// The RTC stack reported an error
    TransportError(String),
    /// The relay connection dropped before the call was up
    SignalingLost,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::PeerGone => f.write_str("peer disconnected"),
            EndReason::LocalEnd => f.write_str("ended locally"),
            EndReason::ConnectivityFailed => f.write_str("connectivity failed"),
            EndReason::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            EndReason::TransportError(msg) => write!(f, "transport error: {}", msg),
            EndReason::SignalingLost => f.write_str("signaling connection lost"),
        }
    }
}

/// User actions accepted by the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acquire media, connect to the relay and start searching
    RequestPermissions,
    /// Cancel the search
    StopSearch,
    /// Hang up
    EndCall,
    /// Leave `Ended` (ending first if a call is active)
    Reset,
    /// Enable or disable every local track of a kind
    SetEnabled(MediaKind, bool),
    /// Flip the enabled state of a kind
    Toggle(MediaKind),
    /// End any call and stop the loop
    Shutdown,
}

/// Observable session events
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// Lifecycle transition
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Relay connection established
    SignalingConnected(LocalIdentity),
    /// `find_peer` sent
    Searching,
    /// The relay paired us
    PeerFound(PeerIdentity),
    /// Capture was refused or impossible
    PermissionDenied(String),
    /// The peer added a media track
    RemoteTrack(RemoteTrack),
    /// Connectivity of the peer transport changed
    Connectivity(ConnectivityState),
    /// A local media kind was enabled or disabled
    MediaToggled {
        /// Kind toggled
        kind: MediaKind,
        /// New state
        enabled: bool,
    },
    /// The call ended
    Ended(EndReason),
}

impl SessionNotice {
    /// Status text for a user-facing status line, if the notice has one
    pub fn status_line(&self) -> Option<String> {
        match self {
            SessionNotice::SignalingConnected(_) => Some("Connected to server".to_string()),
            SessionNotice::Searching => Some("Looking for peer...".to_string()),
            SessionNotice::PeerFound(_) => Some("Peer found! Creating connection...".to_string()),
            SessionNotice::PermissionDenied(_) => Some("Camera/mic access denied".to_string()),
            SessionNotice::Connectivity(state) => Some(format!("Connection state: {}", state)),
            SessionNotice::Ended(EndReason::PeerGone) => Some("Peer disconnected".to_string()),
            SessionNotice::Ended(reason) => Some(format!("Call ended: {}", reason)),
            SessionNotice::StateChanged { .. }
            | SessionNotice::RemoteTrack(_)
            | SessionNotice::MediaToggled { .. } => None,
        }
    }

    /// Whether the status indicator should show "connected"
    ///
    /// `None` when the notice does not affect the indicator.
    pub fn is_connected(&self) -> Option<bool> {
        match self {
            SessionNotice::SignalingConnected(_) | SessionNotice::PeerFound(_) => Some(true),
            SessionNotice::Searching
            | SessionNotice::PermissionDenied(_)
            | SessionNotice::Ended(_) => Some(false),
            SessionNotice::Connectivity(state) => Some(*state == ConnectivityState::Connected),
            SessionNotice::StateChanged { .. }
            | SessionNotice::RemoteTrack(_)
            | SessionNotice::MediaToggled { .. } => None,
        }
    }
}
