//! Configuration types for a call session

use serde::{Deserialize, Serialize};

/// Public address-discovery server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main configuration for a call session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// WebSocket relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs used for network-path discovery (at least one)
    pub ice_servers: Vec<String>,

    /// Capture constraints handed to the device layer
    pub capture: CaptureConstraints,
}

/// What to request from the capture devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Capture microphone audio (default: true)
    pub audio: bool,

    /// Capture camera video at the given target resolution (default: 1280x720)
    pub video: Option<VideoConstraints>,
}

/// Target video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            capture: CaptureConstraints::default(),
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl CaptureConstraints {
    /// Audio-only capture
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `ice_servers` is empty or contains a non-STUN URL
    /// - `capture` requests neither audio nor video
    /// - the video target has a zero dimension
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        // Credentialed relay servers are not supported
        if let Some(bad) = self
            .ice_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "ice server must be a stun: or stuns: URL, got {}",
                bad
            )));
        }

        if !self.capture.audio && self.capture.video.is_none() {
            return Err(Error::InvalidConfig(
                "capture must request audio, video or both".to_string(),
            ));
        }

        if let Some(video) = self.capture.video {
            if video.width == 0 || video.height == 0 {
                return Err(Error::InvalidConfig(format!(
                    "video target must be non-zero, got {}x{}",
                    video.width, video.height
                )));
            }
        }

        Ok(())
    }

    /// Build a configuration from `PEERCALL_*` environment variables
    ///
    /// Unset variables keep their defaults:
    /// - `PEERCALL_SIGNALING_URL`
    /// - `PEERCALL_ICE_SERVERS` (comma-separated)
    /// - `PEERCALL_AUDIO` (`off`/`false`/`0` disables audio)
    /// - `PEERCALL_VIDEO` (`off`/`false`/`0` disables video)
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("PEERCALL_SIGNALING_URL") {
            config.signaling_url = url;
        }

        if let Some(servers) = lookup("PEERCALL_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if lookup("PEERCALL_AUDIO").is_some_and(|v| is_off(&v)) {
            config.capture.audio = false;
        }

        if lookup("PEERCALL_VIDEO").is_some_and(|v| is_off(&v)) {
            config.capture.video = None;
        }

        config.validate()?;
        Ok(config)
    }
}

fn is_off(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "off" | "false" | "0" | "no"
    )
}
