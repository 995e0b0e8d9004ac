//! Signaling wire protocol
//!
//! Every frame on the signaling channel is a JSON object tagged by `type`:
//!
//! | type          | fields                          | direction      |
//! |---------------|---------------------------------|----------------|
//! | `role`        | `role: "offerer" \| "answerer"` | server → peer  |
//! | `peer-joined` | -                               | server → peer  |
//! | `description` | `sdp: {type, sdp}`              | bidirectional  |
//! | `candidate`   | `candidate: {candidate, ...}`   | bidirectional  |
//! | `chat`        | `text`                          | bidirectional  |
//!
//! Field names inside `sdp` and `candidate` follow the browser's
//! `RTCSessionDescriptionInit` / `RTCIceCandidateInit` JSON so frames can be
//! exchanged with browser peers unchanged.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation role assigned by the relay when a peer joins a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// First peer in the room. Its offers win every collision.
    #[serde(rename = "offerer")]
    Impolite,
    /// Every later peer. Rolls back its own offer on collision.
    #[serde(rename = "answerer")]
    Polite,
}

impl Role {
    /// Role for a peer joining a room that already holds `occupants` peers
    pub fn for_occupancy(occupants: usize) -> Self {
        if occupants == 0 {
            Role::Impolite
        } else {
            Role::Polite
        }
    }

    pub fn is_polite(&self) -> bool {
        matches!(self, Role::Polite)
    }

    /// Wire name ("offerer" / "answerer")
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Impolite => "offerer",
            Role::Polite => "answerer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type (offer, answer, ...)
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body; empty for rollback
    #[serde(default)]
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

    /// Rollback pseudo-description (reverts a pending local offer)
    pub fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// One ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// `candidate:` attribute line; empty string marks end-of-candidates
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }

    /// True for the empty end-of-candidates marker
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Signaling message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Role assignment (server → peer)
    Role { role: Role },

    /// Another peer arrived in the room (server → peer)
    PeerJoined,

    /// Offer, answer or rollback
    Description { sdp: SessionDescription },

    /// One trickled ICE candidate
    Candidate { candidate: IceCandidate },

    /// Chat text; never touches negotiation state
    Chat { text: String },
}

impl SignalingMessage {
    pub fn role(role: Role) -> Self {
        Self::Role { role }
    }

    pub fn description(sdp: SessionDescription) -> Self {
        Self::Description { sdp }
    }

    pub fn candidate(candidate: IceCandidate) -> Self {
        Self::Candidate { candidate }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::Chat { text: text.into() }
    }

    /// Message discriminant
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Role { .. } => MessageKind::Role,
            Self::PeerJoined => MessageKind::PeerJoined,
            Self::Description { .. } => MessageKind::Description,
            Self::Candidate { .. } => MessageKind::Candidate,
            Self::Chat { .. } => MessageKind::Chat,
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Message discriminant, readable without decoding the full payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Role,
    PeerJoined,
    Description,
    Candidate,
    Chat,
}

impl MessageKind {
    /// Read only the `type` tag of a frame. Returns `None` for non-JSON
    /// frames and unknown tags.
    pub fn peek(text: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct Tag {
            #[serde(rename = "type")]
            kind: MessageKind,
        }

        serde_json::from_str::<Tag>(text).ok().map(|tag| tag.kind)
    }

    /// Kinds only the relay may originate
    pub fn is_server_only(&self) -> bool {
        matches!(self, MessageKind::Role | MessageKind::PeerJoined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Role => "role",
            MessageKind::PeerJoined => "peer-joined",
            MessageKind::Description => "description",
            MessageKind::Candidate => "candidate",
            MessageKind::Chat => "chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_wire_format() {
        let msg = SignalingMessage::role(Role::Impolite);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "role", "role": "offerer"}));

        let parsed = SignalingMessage::from_json(r#"{"type": "role", "role": "answerer"}"#).unwrap();
        assert_eq!(parsed, SignalingMessage::role(Role::Polite));
    }

    #[test]
    fn test_peer_joined_has_no_fields() {
        let msg = SignalingMessage::PeerJoined;
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"peer-joined"}"#);
        assert_eq!(
            SignalingMessage::from_json(r#"{"type": "peer-joined"}"#).unwrap(),
            SignalingMessage::PeerJoined
        );
    }

    #[test]
    fn test_browser_description_parses() {
        let frame = r#"{"type":"description","sdp":{"type":"offer","sdp":"v=0\r\n"}}"#;
        let msg = SignalingMessage::from_json(frame).unwrap();
        match msg {
            SignalingMessage::Description { sdp } => {
                assert!(sdp.is_offer());
                assert_eq!(sdp.sdp, "v=0\r\n");
            }
            other => panic!("Expected description, got {:?}", other),
        }
    }

    #[test]
    fn test_rollback_without_sdp_body() {
        let frame = r#"{"type":"description","sdp":{"type":"rollback"}}"#;
        let msg = SignalingMessage::from_json(frame).unwrap();
        assert_eq!(msg, SignalingMessage::description(SessionDescription::rollback()));
    }

    #[test]
    fn test_browser_candidate_field_names() {
        let frame = json!({
            "type": "candidate",
            "candidate": {
                "candidate": "candidate:1 1 UDP 2130706431 192.168.1.10 50000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "abcd"
            }
        });
        let msg = SignalingMessage::from_json(&frame.to_string()).unwrap();
        let SignalingMessage::Candidate { candidate } = msg else {
            panic!("Expected candidate");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
        assert!(!candidate.is_end_of_candidates());
    }

    #[test]
    fn test_end_of_candidates_marker() {
        assert!(IceCandidate::new("", None, None).is_end_of_candidates());
        assert!(IceCandidate::new("  ", Some("0".into()), Some(0)).is_end_of_candidates());
    }

    #[test]
    fn test_peek_kind() {
        assert_eq!(
            MessageKind::peek(r#"{"type":"chat","text":"hi"}"#),
            Some(MessageKind::Chat)
        );
        assert_eq!(MessageKind::peek(r#"{"type":"peer-joined"}"#), Some(MessageKind::PeerJoined));
        assert_eq!(MessageKind::peek(r#"{"type":"bogus"}"#), None);
        assert_eq!(MessageKind::peek("not json"), None);
        assert!(MessageKind::Role.is_server_only());
        assert!(!MessageKind::Description.is_server_only());
    }

    #[test]
    fn test_role_for_occupancy() {
        assert_eq!(Role::for_occupancy(0), Role::Impolite);
        assert_eq!(Role::for_occupancy(1), Role::Polite);
        assert_eq!(Role::for_occupancy(5), Role::Polite);
    }
}
