//! Session lifecycle: one call attempt from permission request to hang-up
//!
//! `Session` owns the media source, the negotiation engine and the relay
//! link. It runs as a single event loop fed by user commands, relay
//! messages and peer-transport events; observers follow it through
//! `SessionNotice`s.

pub mod handle;
pub mod lifecycle;
pub mod state;

pub use handle::SessionHandle;
pub use lifecycle::Session;
pub use state::{Command, EndReason, SessionNotice, SessionState};
