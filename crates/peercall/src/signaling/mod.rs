//! Signaling: the message channel to the relay server
//!
//! The session only sees `SignalingLink`s: a local identity, a sender for
//! outbound messages and a receiver for inbound ones. Two connectors are
//! provided:
//! - `WebSocketConnector`: JSON text frames over WebSocket
//! - `MemoryRelay`: in-process relay for tests and embedding

pub mod link;
pub mod memory;
pub mod protocol;
pub mod websocket;

pub use link::{SignalSender, SignalingConnector, SignalingLink};
pub use memory::{MemoryConnector, MemoryRelay};
pub use protocol::{
    ConnectionId, IceCandidate, LocalIdentity, PeerIdentity, SdpType, SessionDescription,
    SignalingMessage,
};
pub use websocket::WebSocketConnector;
