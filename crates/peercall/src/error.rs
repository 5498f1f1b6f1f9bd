//! Error types for call negotiation

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring media, signaling or negotiating
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user (or platform) refused camera/microphone access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device matches the requested constraints
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A capture handle is already live for this session
    #[error("Capture already in progress")]
    CaptureBusy,

    /// A transport operation arrived while no peer transport exists
    #[error("No active peer transport")]
    NoActiveTransport,

    /// The direct transport could not be established or was lost
    #[error("Connectivity failed: {0}")]
    ConnectivityFailed(String),

    /// The remote party left the call
    #[error("Peer disconnected")]
    PeerGone,

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error came from media acquisition
    ///
    /// Acquisition errors are reported to the user and leave the session idle.
    pub fn is_acquisition_error(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_) | Error::DeviceUnavailable(_) | Error::CaptureBusy
        )
    }

    /// Check if this error ends the current pairing
    ///
    /// The session tears the peer transport down and moves to `Ended`.
    pub fn ends_pairing(&self) -> bool {
        matches!(
            self,
            Error::NoActiveTransport
                | Error::ConnectivityFailed(_)
                | Error::PeerGone
                | Error::SdpError(_)
                | Error::MediaTrackError(_)
                | Error::WebRtcError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}
