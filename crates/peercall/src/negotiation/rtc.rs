//! `RtcBackend` on top of the webrtc crate

use super::backend::{
    ConnectivityState, RemoteTrack, RtcBackend, RtcConnection, TransportEventKind,
    TransportEventSink,
};
use crate::media::{LocalTrack, MediaKind};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Backend creating real peer connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcBackend;

impl WebRtcBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RtcBackend for WebRtcBackend {
    async fn open(
        &self,
        ice_servers: &[String],
        sink: TransportEventSink,
    ) -> Result<Arc<dyn RtcConnection>> {
        // Create MediaEngine with default codecs (Opus, VP8, ...)
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        info!(
            generation = sink.generation(),
            "Created peer connection with {} ice server(s)",
            ice_servers.len()
        );

        register_handlers(&pc, sink);

        Ok(Arc::new(WebRtcConnection {
            pc,
            senders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

fn register_handlers(pc: &RTCPeerConnection, sink: TransportEventSink) {
    let candidate_sink = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = candidate_sink.clone();
        Box::pin(async move {
            let candidate = match candidate.map(|c| c.to_json()).transpose() {
                Ok(init) => init.map(IceCandidate::from),
                Err(e) => {
                    warn!("Failed to serialize local candidate: {}", e);
                    return;
                }
            };
            sink.emit(TransportEventKind::LocalCandidate(candidate));
        })
    }));

    let track_sink = sink.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let sink = track_sink.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                other => {
                    debug!("Ignoring remote track of kind {:?}", other);
                    return;
                }
            };
            sink.emit(TransportEventKind::RemoteTrack(RemoteTrack {
                kind,
                track_id: track.id(),
                stream_id: track.stream_id(),
            }));
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            let state = match s {
                RTCPeerConnectionState::New => ConnectivityState::New,
                RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
                RTCPeerConnectionState::Connected => ConnectivityState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectivityState::Failed,
                RTCPeerConnectionState::Closed => ConnectivityState::Closed,
                _ => return,
            };
            sink.emit(TransportEventKind::ConnectivityChanged(state));
        })
    }));
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse description: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::SdpError(format!(
            "Unsupported description type: {:?}",
            other
        ))),
    }
}

/// A webrtc-rs peer connection
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,

    /// RTP senders (retained to keep tracks attached)
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,

    closed: AtomicBool,
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        // Drain RTCP so interceptors keep working
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().push(sender);
        debug!("Attached local {} track {}", track.kind(), track.id());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.senders.lock().clear();
        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
