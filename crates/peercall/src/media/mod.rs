//! Local media capture
//!
//! Acquires camera/microphone tracks, exposes per-kind enable/disable and
//! releases everything on teardown.

pub mod devices;
pub mod source;
pub mod tracks;

pub use devices::{CaptureDevices, SyntheticDevices};
pub use source::MediaSource;
pub use tracks::{LocalTrack, MediaCaptureHandle, MediaKind};
