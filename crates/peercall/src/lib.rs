//! Two-party WebRTC calls
//!
//! This crate implements the client side of a one-to-one audio/video call
//! brokered by a relay server: local media capture, the offer/answer and
//! candidate exchange, and the call lifecycle from permission request to
//! hang-up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Session (single event loop)                         │
//! │  ├─ MediaSource (capture handle, per-kind toggles)   │
//! │  ├─ NegotiationEngine                                │
//! │  │   └─ PeerTransport ── RtcBackend (webrtc crate)   │
//! │  └─ SignalingLink ── SignalingConnector              │
//! │       ├─ WebSocketConnector (JSON over WebSocket)    │
//! │       └─ MemoryRelay (in-process)                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peercall::CallConfig;
//!
//! let config = CallConfig {
//!     signaling_url: "wss://relay.example/ws".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use peercall::media::SyntheticDevices;
//! use peercall::negotiation::WebRtcBackend;
//! use peercall::signaling::WebSocketConnector;
//! use peercall::{CallConfig, Session};
//! use std::sync::Arc;
//!
//! # async fn example() -> peercall::Result<()> {
//! let config = CallConfig::default();
//! let connector = Arc::new(WebSocketConnector::new(&config.signaling_url));
//! let session = Session::new(
//!     config,
//!     Arc::new(SyntheticDevices::granting()),
//!     connector,
//!     Arc::new(WebRtcBackend::new()),
//! )?;
//!
//! let (handle, task) = session.spawn();
//! handle.request_permissions()?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{CallConfig, CaptureConstraints, VideoConstraints};
pub use error::{Error, Result};
pub use media::{MediaCaptureHandle, MediaKind, MediaSource};
pub use negotiation::{ConnectivityState, NegotiationEngine, NegotiationState, Role};
pub use session::{Command, EndReason, Session, SessionHandle, SessionNotice, SessionState};
pub use signaling::{PeerIdentity, SignalingMessage};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
