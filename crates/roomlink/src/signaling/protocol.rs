//! Room signaling protocol types
//!
//! JSON text frames exchanged with the relay. Every frame is an envelope
//! `{"type": "<kebab-case tag>", "data": <payload>}`; payload field names are
//! camelCase. The `webrtc-signal` payload carries its own `type` field for
//! the signal kind, which is why the kind lives inside `data` rather than on
//! the envelope.

use serde::{Deserialize, Serialize};

/// Signal kinds relayed between peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// ICE candidate
    IceCandidate,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::IceCandidate => write!(f, "ice-candidate"),
        }
    }
}

/// One remote endpoint as reported by the relay
///
/// Also the roster entry type: the wire form and the domain form coincide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Stable user identity (may repeat across sessions)
    pub user_id: String,

    /// Ephemeral per-connection identifier, unique per session instance
    pub transport_id: String,

    /// When the participant joined the room
    pub joined_at: chrono::DateTime<chrono::Utc>,

    /// Whether the relay considers the participant active
    pub is_active: bool,
}

impl Participant {
    /// Build a participant record for a just-announced join
    pub fn joined_now(user_id: &str, transport_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            transport_id: transport_id.to_string(),
            joined_at: chrono::Utc::now(),
            is_active: true,
        }
    }
}

/// Parameters for `join-room`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomParams {
    /// Room to join
    pub room_id: String,

    /// Local user identity
    pub user_id: String,
}

/// Parameters for an outbound `webrtc-signal`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalParams {
    /// Opaque negotiation payload (SDP description or candidate init)
    pub signal: serde_json::Value,

    /// Transport the relay should deliver to
    pub target_transport_id: String,

    /// Signal kind
    #[serde(rename = "type")]
    pub kind: SignalKind,
}

/// Parameters for an inbound `webrtc-signal`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSignalParams {
    /// Opaque negotiation payload
    pub signal: serde_json::Value,

    /// Transport that originated the signal
    pub from: String,

    /// Signal kind
    #[serde(rename = "type")]
    pub kind: SignalKind,
}

/// Parameters for `user-joined`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedParams {
    /// Stable user identity
    pub user_id: String,

    /// Ephemeral transport identifier
    pub transport_id: String,
}

/// Parameters for `user-left`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftParams {
    /// Transport that departed
    pub transport_id: String,
}

/// Parameters for `room-error`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomErrorParams {
    /// Human-readable error description
    pub error: String,

    /// Machine-readable error code, when the relay provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Messages sent from the coordinator to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce presence in a room
    JoinRoom(JoinRoomParams),

    /// Relay a negotiation signal to one peer
    WebrtcSignal(SignalParams),
}

/// Messages received from the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full roster snapshot, delivered once per room join
    ExistingParticipants(Vec<Participant>),

    /// A participant joined after us
    UserJoined(UserJoinedParams),

    /// A participant departed
    UserLeft(UserLeftParams),

    /// A negotiation signal from one peer
    WebrtcSignal(IncomingSignalParams),

    /// Room-level rejection or fault
    RoomError(RoomErrorParams),
}

impl ClientMessage {
    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize client message: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize client message: {}", e))
        })
    }

    /// Get the wire tag
    pub fn message_type(&self) -> &str {
        match self {
            ClientMessage::JoinRoom(_) => "join-room",
            ClientMessage::WebrtcSignal(_) => "webrtc-signal",
        }
    }
}

impl ServerMessage {
    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize server message: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize server message: {}", e))
        })
    }

    /// Get the wire tag
    pub fn message_type(&self) -> &str {
        match self {
            ServerMessage::ExistingParticipants(_) => "existing-participants",
            ServerMessage::UserJoined(_) => "user-joined",
            ServerMessage::UserLeft(_) => "user-left",
            ServerMessage::WebrtcSignal(_) => "webrtc-signal",
            ServerMessage::RoomError(_) => "room-error",
        }
    }
}
