//! Signaling wire protocol
//!
//! One JSON object per WebSocket text frame:
//!
//! ```text
//! {"type": "offer"|"answer"|"candidate",
//!  "sdp"?: {"type": "...", "sdp": "v=0..."},
//!  "candidate"?: {"candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0},
//!  "clientId"?: "..."}
//! ```
//!
//! Unknown `type` values decode to [`SignalMessage::Unknown`] and are ignored
//! by the session controller. An absent, null or empty `candidate` is the
//! remote end-of-candidates sentinel.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// SDP type carried inside a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description object, as produced by `RTCPeerConnection.localDescription`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate, as produced by `RTCIceCandidate.toJSON()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(default)]
    pub candidate: String,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,

    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// A decoded signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    /// `None` is the end-of-candidates sentinel
    Candidate(Option<IceCandidate>),
    /// Unrecognized `type`; carries the raw type string for logging
    Unknown(String),
}

/// A decoded message plus the optional client identifier it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message: SignalMessage,
    pub client_id: Option<String>,
}

/// Flat wire representation shared by every message type
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<SessionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<IceCandidate>,

    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
}

impl SignalMessage {
    /// Wire `type` tag for this message
    pub fn kind(&self) -> &str {
        match self {
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::Unknown(kind) => kind,
        }
    }

    /// Decode one text frame
    ///
    /// Malformed JSON is a protocol error and fatal to the connection; an
    /// `offer`/`answer` without `sdp` only invalidates that one message.
    pub fn decode(text: &str) -> Result<Envelope> {
        let wire: WireMessage = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("Failed to parse signaling message: {}", e)))?;

        let message = match wire.kind.as_str() {
            "offer" => SignalMessage::Offer(
                wire.sdp
                    .ok_or_else(|| Error::Sdp("offer without sdp".to_string()))?,
            ),
            "answer" => SignalMessage::Answer(
                wire.sdp
                    .ok_or_else(|| Error::Sdp("answer without sdp".to_string()))?,
            ),
            "candidate" => {
                SignalMessage::Candidate(wire.candidate.filter(|c| !c.candidate.is_empty()))
            }
            _ => SignalMessage::Unknown(wire.kind),
        };

        Ok(Envelope {
            message,
            client_id: wire.client_id,
        })
    }

    /// Encode as one text frame
    pub fn encode(&self) -> Result<String> {
        let wire = match self {
            SignalMessage::Offer(sdp) | SignalMessage::Answer(sdp) => WireMessage {
                kind: self.kind().to_string(),
                sdp: Some(sdp.clone()),
                candidate: None,
                client_id: None,
            },
            SignalMessage::Candidate(candidate) => WireMessage {
                kind: self.kind().to_string(),
                sdp: None,
                candidate: candidate.clone(),
                client_id: None,
            },
            SignalMessage::Unknown(kind) => {
                return Err(Error::Protocol(format!(
                    "Cannot encode unknown message type '{}'",
                    kind
                )))
            }
        };

        Ok(serde_json::to_string(&wire)?)
    }
}
