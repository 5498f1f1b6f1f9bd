//! Signaling wire types
//!
//! Messages are JSON objects tagged by event name:
//! `{"event": "offer", "data": {"sdp": {"type": "offer", "sdp": "v=0..."}}}`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque connection identifier handed out by the relay
///
/// Ordering is plain lexicographic string comparison; it is what decides
/// which side of a pairing sends the offer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

/// Identity of this side, valid for one relay connection
pub type LocalIdentity = ConnectionId;

/// Identity of the matched remote party, valid for one pairing
pub type PeerIdentity = ConnectionId;

impl ConnectionId {
    /// Wrap a relay-provided identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial description from the offerer
    Offer,
    /// Response from the answerer
    Answer,
}

/// Session description as exchanged with browsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub kind: SdpType,

    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network-path candidate in browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Browsers signal end-of-candidates with an empty attribute line
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Every message exchanged with the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Relay handshake carrying this connection's identity (inbound)
    Connected {
        /// Local identity
        id: ConnectionId,
    },

    /// Ask the relay to match us with a peer (outbound)
    FindPeer,

    /// Cancel a pending match request (outbound)
    StopFindingPeer,

    /// The relay matched us with a peer (inbound)
    PeerFound {
        /// Remote identity
        #[serde(rename = "peerId")]
        peer_id: ConnectionId,
    },

    /// Offer description (both directions)
    Offer {
        /// The offer
        sdp: SessionDescription,
    },

    /// Answer description (both directions)
    Answer {
        /// The answer
        sdp: SessionDescription,
    },

    /// Network-path candidate, `None` for end-of-candidates (both directions)
    IceCandidate {
        /// The candidate
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },

    /// The matched peer left (inbound)
    PeerDisconnected,
}

impl SignalingMessage {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Connected { .. } => "connected",
            SignalingMessage::FindPeer => "find_peer",
            SignalingMessage::StopFindingPeer => "stop_finding_peer",
            SignalingMessage::PeerFound { .. } => "peer_found",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::PeerDisconnected => "peer_disconnected",
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidData(format!("Invalid signaling message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_ordering_is_lexicographic() {
        assert!(ConnectionId::from("aa") < ConnectionId::from("bb"));
        assert!(ConnectionId::from("Zz") < ConnectionId::from("aa"));
        assert!(ConnectionId::from("a1") < ConnectionId::from("a10"));
        assert!(ConnectionId::from("a9") > ConnectionId::from("a10"));
    }

    #[test]
    fn test_unit_events_encode_without_data() {
        let json: serde_json::Value =
            serde_json::from_str(&SignalingMessage::FindPeer.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"event": "find_peer"}));

        let msg = SignalingMessage::from_json(r#"{"event":"peer_disconnected"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::PeerDisconnected);
    }

    #[test]
    fn test_peer_found_uses_camel_case_field() {
        let msg = SignalingMessage::from_json(r#"{"event":"peer_found","data":{"peerId":"bb"}}"#)
            .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::PeerFound {
                peer_id: ConnectionId::from("bb")
            }
        );
    }

    #[test]
    fn test_offer_matches_browser_shape() {
        let msg = SignalingMessage::Offer {
            sdp: SessionDescription::offer("v=0\r\n"),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"event": "offer", "data": {"sdp": {"type": "offer", "sdp": "v=0\r\n"}}})
        );
    }

    #[test]
    fn test_browser_candidate_parses() {
        let text = r#"{"event":"ice_candidate","data":{"candidate":{
            "candidate":"candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host",
            "sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}}}"#;

        match SignalingMessage::from_json(text).unwrap() {
            SignalingMessage::IceCandidate {
                candidate: Some(c),
            } => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert!(!c.is_end_of_candidates());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_null_candidate_is_end_of_candidates() {
        let msg =
            SignalingMessage::from_json(r#"{"event":"ice_candidate","data":{"candidate":null}}"#)
                .unwrap();
        assert_eq!(msg, SignalingMessage::IceCandidate { candidate: None });

        assert!(IceCandidate::new("").is_end_of_candidates());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = SignalingMessage::from_json(r#"{"event":"chat","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
