//! Offer/answer negotiation for one pairing at a time
//!
//! - `Role`: which side offers
//! - `NegotiationEngine`: owns the `PeerTransport` and sequences descriptions
//!   and candidates
//! - `RtcBackend`/`RtcConnection`: the peer-connection seam, implemented by
//!   `WebRtcBackend` (webrtc crate) and, for tests, `testing::ScriptedBackend`

pub mod backend;
pub mod engine;
pub mod role;
pub mod rtc;
pub mod transport;

pub use backend::{
    ConnectivityState, RemoteTrack, RtcBackend, RtcConnection, TransportEvent,
    TransportEventKind, TransportEventSink,
};
pub use engine::{EngineOutput, NegotiationEngine};
pub use role::Role;
pub use rtc::{WebRtcBackend, WebRtcConnection};
pub use transport::{NegotiationState, PeerTransport};
