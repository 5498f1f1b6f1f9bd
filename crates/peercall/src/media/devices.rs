//! Capture device access

use super::tracks::MediaKind;
use crate::config::CaptureConstraints;
use crate::{Error, Result};
use async_trait::async_trait;

/// Platform permission prompt + device enumeration
///
/// Returns the kinds of media the platform granted for `constraints`.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Request access to devices matching `constraints`
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Vec<MediaKind>>;
}

/// Outcome a `SyntheticDevices` instance produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Grant,
    Deny,
    Unavailable,
}

/// Device layer without real hardware
///
/// Grants exactly what the constraints ask for (or fails in a fixed way),
/// which is what a headless client or a test needs.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticDevices {
    outcome: Outcome,
}

impl SyntheticDevices {
    /// Grant every requested kind
    pub fn granting() -> Self {
        Self {
            outcome: Outcome::Grant,
        }
    }

    /// Refuse permission
    pub fn denying() -> Self {
        Self {
            outcome: Outcome::Deny,
        }
    }

    /// Report that no matching device exists
    pub fn unavailable() -> Self {
        Self {
            outcome: Outcome::Unavailable,
        }
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::granting()
    }
}

#[async_trait]
impl CaptureDevices for SyntheticDevices {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Vec<MediaKind>> {
        match self.outcome {
            Outcome::Deny => Err(Error::PermissionDenied(
                "camera/microphone access refused".to_string(),
            )),
            Outcome::Unavailable => Err(Error::DeviceUnavailable(
                "no capture device matches the constraints".to_string(),
            )),
            Outcome::Grant => {
                let mut kinds = Vec::with_capacity(2);
                if constraints.audio {
                    kinds.push(MediaKind::Audio);
                }
                if constraints.video.is_some() {
                    kinds.push(MediaKind::Video);
                }
                Ok(kinds)
            }
        }
    }
}
