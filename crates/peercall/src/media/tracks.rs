//! Local capture tracks and the handle that owns them

use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// A single captured track
///
/// The enabled flag is independent of the track's lifetime: a disabled track
/// stays attached to the peer transport and simply stops carrying media, so
/// muting never requires renegotiation.
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtp: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    /// Create a live, enabled track belonging to `stream_id`
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());

        let capability = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000, // Standard 90kHz clock for video
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        };

        let rtp = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_string(),
        ));

        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp,
        }
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Whether the track currently carries media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Enable or disable the track without stopping it
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop the track permanently
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped local {} track {}", self.kind, self.id);
        }
    }

    /// RTP sender side of the track, attached to peer transports
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    /// Write one encoded frame to the track
    ///
    /// Returns `Ok(false)` when the frame was dropped because the track is
    /// disabled or stopped.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }

        let sample = Sample {
            data,
            duration,
            timestamp: SystemTime::now(),
            ..Default::default()
        };

        self.rtp
            .write_sample(&sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))?;

        Ok(true)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Owns every track produced by one successful capture request
#[derive(Debug)]
pub struct MediaCaptureHandle {
    stream_id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl MediaCaptureHandle {
    /// Build a handle with one live track per granted kind
    pub fn new(kinds: &[MediaKind]) -> Self {
        let stream_id = format!("stream-{}", uuid::Uuid::new_v4());
        let tracks = kinds
            .iter()
            .map(|kind| Arc::new(LocalTrack::new(*kind, &stream_id)))
            .collect();

        Self { stream_id, tracks }
    }

    /// Stream identifier shared by all tracks
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// All tracks in capture order
    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Whether any track of `kind` is enabled, `None` if there is no such track
    pub fn is_enabled(&self, kind: MediaKind) -> Option<bool> {
        let mut tracks = self.tracks_of(kind).peekable();
        tracks.peek()?;
        Some(tracks.any(|t| t.is_enabled()))
    }

    /// Toggle every track of `kind`, returning how many tracks changed
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> usize {
        let mut changed = 0;
        for track in self.tracks_of(kind) {
            if track.is_enabled() != enabled {
                track.set_enabled(enabled);
                changed += 1;
            }
        }
        changed
    }

    /// Stop every track; safe to call repeatedly
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Whether every track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::track::track_local::TrackLocal;

    #[test]
    fn test_handle_tracks() {
        let handle = MediaCaptureHandle::new(&[MediaKind::Audio, MediaKind::Video]);
        assert_eq!(handle.tracks().len(), 2);
        assert_eq!(handle.tracks_of(MediaKind::Audio).count(), 1);
        assert_eq!(handle.is_enabled(MediaKind::Video), Some(true));
        assert!(handle
            .tracks()
            .iter()
            .all(|t| t.rtp_track().stream_id() == handle.stream_id()));
    }

    #[test]
    fn test_missing_kind_has_no_enabled_state() {
        let handle = MediaCaptureHandle::new(&[MediaKind::Audio]);
        assert_eq!(handle.is_enabled(MediaKind::Video), None);
        assert_eq!(handle.set_enabled(MediaKind::Video, false), 0);
    }

    #[test]
    fn test_set_enabled_only_touches_kind() {
        let handle = MediaCaptureHandle::new(&[MediaKind::Audio, MediaKind::Video]);

        assert_eq!(handle.set_enabled(MediaKind::Audio, false), 1);
        assert_eq!(handle.is_enabled(MediaKind::Audio), Some(false));
        assert_eq!(handle.is_enabled(MediaKind::Video), Some(true));

        // Already disabled
        assert_eq!(handle.set_enabled(MediaKind::Audio, false), 0);
        assert_eq!(handle.set_enabled(MediaKind::Audio, true), 1);
        assert_eq!(handle.is_enabled(MediaKind::Audio), Some(true));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let handle = MediaCaptureHandle::new(&[MediaKind::Audio, MediaKind::Video]);
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let track = LocalTrack::new(MediaKind::Audio, "stream-test");
        track.set_enabled(false);

        let written = track
            .write_sample(Bytes::from_static(&[0xf8, 0xff, 0xfe]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);

        track.set_enabled(true);
        track.stop();
        let written = track
            .write_sample(Bytes::from_static(&[0xf8, 0xff, 0xfe]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);
    }
}
