//! Media source: acquisition, toggling and release of the capture handle

use super::devices::CaptureDevices;
use super::tracks::{MediaCaptureHandle, MediaKind};
use crate::config::CaptureConstraints;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exclusive owner of the session's capture handle
pub struct MediaSource {
    devices: Arc<dyn CaptureDevices>,
    handle: Option<MediaCaptureHandle>,
}

impl MediaSource {
    /// Create a media source backed by `devices`
    pub fn new(devices: Arc<dyn CaptureDevices>) -> Self {
        Self {
            devices,
            handle: None,
        }
    }

    /// Request capture devices matching `constraints`
    ///
    /// Fails with `CaptureBusy` while a handle is live; a second capture
    /// never coexists with the first.
    pub async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<&MediaCaptureHandle> {
        if self.handle.is_some() {
            return Err(Error::CaptureBusy);
        }

        let kinds = match self.devices.open(constraints).await {
            Ok(kinds) if kinds.is_empty() => {
                return Err(Error::DeviceUnavailable(
                    "no track was granted".to_string(),
                ));
            }
            Ok(kinds) => kinds,
            Err(e) => {
                warn!("Error accessing media devices: {}", e);
                return Err(e);
            }
        };

        let handle = MediaCaptureHandle::new(&kinds);
        info!(
            stream_id = handle.stream_id(),
            tracks = handle.tracks().len(),
            "Local media acquired"
        );

        Ok(self.handle.insert(handle))
    }

    /// Enable or disable every track of `kind`
    ///
    /// Returns `false` when there is no live handle.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> bool {
        match &self.handle {
            Some(handle) => {
                let changed = handle.set_enabled(kind, enabled);
                debug!("Set {} enabled={} ({} tracks changed)", kind, enabled, changed);
                true
            }
            None => false,
        }
    }

    /// Flip the enabled state of `kind`, returning the new state
    ///
    /// `None` when there is no live handle or no track of that kind.
    pub fn toggle(&self, kind: MediaKind) -> Option<bool> {
        let handle = self.handle.as_ref()?;
        let enabled = !handle.is_enabled(kind)?;
        handle.set_enabled(kind, enabled);
        Some(enabled)
    }

    /// Stop every track and drop the handle; idempotent
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            info!(stream_id = handle.stream_id(), "Local media released");
        }
    }

    /// The live handle, for preview and for attaching to a transport
    pub fn handle(&self) -> Option<&MediaCaptureHandle> {
        self.handle.as_ref()
    }

    /// Whether a handle is live
    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticDevices;
    use tokio_test::{assert_err, assert_ok};

    fn source() -> MediaSource {
        MediaSource::new(Arc::new(SyntheticDevices::granting()))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let mut media = source();
        let handle = assert_ok!(media.acquire(&CaptureConstraints::default()).await);
        assert_eq!(handle.tracks().len(), 2);
        let tracks = handle.tracks().to_vec();

        media.release();
        assert!(!media.is_live());
        assert!(tracks.iter().all(|t| t.is_stopped()));

        // Release is idempotent
        media.release();
    }

    #[tokio::test]
    async fn test_second_acquire_fails() {
        let mut media = source();
        assert_ok!(media.acquire(&CaptureConstraints::default()).await);
        let err = assert_err!(media.acquire(&CaptureConstraints::default()).await);
        assert!(matches!(err, Error::CaptureBusy));

        media.release();
        assert_ok!(media.acquire(&CaptureConstraints::audio_only()).await);
    }

    #[tokio::test]
    async fn test_denied_acquire_leaves_no_handle() {
        let mut media = MediaSource::new(Arc::new(SyntheticDevices::denying()));
        let err = assert_err!(media.acquire(&CaptureConstraints::default()).await);
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!media.is_live());
    }

    #[tokio::test]
    async fn test_toggle_round_trip_keeps_tracks() {
        let mut media = source();
        assert_ok!(media.acquire(&CaptureConstraints::default()).await);
        let before: Vec<String> = media
            .handle()
            .unwrap()
            .tracks()
            .iter()
            .map(|t| t.id().to_string())
            .collect();

        assert_eq!(media.toggle(MediaKind::Video), Some(false));
        assert_eq!(media.toggle(MediaKind::Video), Some(true));
        assert!(media.set_enabled(MediaKind::Audio, false));

        let handle = media.handle().unwrap();
        let after: Vec<String> = handle.tracks().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(before, after);
        assert_eq!(handle.is_enabled(MediaKind::Audio), Some(false));
        assert_eq!(handle.is_enabled(MediaKind::Video), Some(true));
    }

    #[test]
    fn test_toggle_without_handle_is_noop() {
        let media = source();
        assert_eq!(media.toggle(MediaKind::Audio), None);
        assert!(!media.set_enabled(MediaKind::Audio, false));
    }
}
