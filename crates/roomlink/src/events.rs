//! Internal event buses
//!
//! Components never call into each other directly: the signaling channel
//! publishes `SignalingEvent`s, peer links publish `LinkEvent`s, and the
//! coordinator's event loop consumes both, mutating the session aggregate
//! and translating into the host-facing `SessionEvent` stream.

use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use crate::media::MediaSource;
use crate::peer::LinkState;
use crate::signaling::protocol::{Participant, SignalKind};

/// Events published by the signaling channel
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// Transport handshake completed (initial connect and each reconnect)
    Connected,

    /// Full roster snapshot, delivered once per room join
    Roster(Vec<Participant>),

    /// A participant joined after us
    ParticipantJoined(Participant),

    /// A participant departed
    ParticipantLeft {
        /// Transport that departed
        transport_id: String,
    },

    /// A negotiation signal addressed to the local endpoint
    Signal {
        /// Transport that originated the signal
        from: String,
        /// Signal kind
        kind: SignalKind,
        /// Opaque negotiation payload
        payload: serde_json::Value,
    },

    /// Room-level rejection or fault from the relay
    RoomError {
        /// Human-readable description
        message: String,
        /// Machine-readable code, when provided
        code: Option<String>,
    },

    /// Transport lost unexpectedly; peer links are orphaned but preserved
    Disconnected {
        /// What took the transport down
        reason: String,
    },
}

/// Events published by peer links toward the coordinator
#[derive(Clone)]
pub enum LinkEvent {
    /// A locally generated signal that must be relayed to the peer
    OutboundSignal {
        /// Target transport
        transport_id: String,
        /// Signal kind
        kind: SignalKind,
        /// Opaque negotiation payload
        payload: serde_json::Value,
    },

    /// The link's connection state changed
    StateChanged {
        /// Affected transport
        transport_id: String,
        /// New state
        state: LinkState,
    },

    /// The remote peer delivered a media track
    RemoteTrack {
        /// Source transport
        transport_id: String,
        /// The inbound track
        track: Arc<TrackRemote>,
    },
}

impl std::fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkEvent::OutboundSignal {
                transport_id, kind, ..
            } => f
                .debug_struct("OutboundSignal")
                .field("transport_id", transport_id)
                .field("kind", kind)
                .finish(),
            LinkEvent::StateChanged {
                transport_id,
                state,
            } => f
                .debug_struct("StateChanged")
                .field("transport_id", transport_id)
                .field("state", state)
                .finish(),
            LinkEvent::RemoteTrack {
                transport_id,
                track,
            } => f
                .debug_struct("RemoteTrack")
                .field("transport_id", transport_id)
                .field("track_id", &track.id())
                .finish(),
        }
    }
}

/// Events surfaced to the host application
#[derive(Clone)]
pub enum SessionEvent {
    /// The local endpoint joined a room and announced presence
    RoomJoined {
        /// Room identifier
        room_id: String,
    },

    /// The local endpoint left the room
    RoomLeft {
        /// Room identifier
        room_id: String,
    },

    /// A participant was added to the roster
    ParticipantAdded(Participant),

    /// A participant was removed from the roster
    ParticipantRemoved {
        /// Transport that was removed
        transport_id: String,
    },

    /// A peer link changed connection state
    PeerStateChanged {
        /// Affected transport
        transport_id: String,
        /// New state
        state: LinkState,
    },

    /// Remote media arrived for a peer
    RemoteTrackAdded {
        /// Source transport
        transport_id: String,
        /// The inbound track
        track: Arc<TrackRemote>,
    },

    /// The local capture source changed
    LocalMediaChanged {
        /// Currently active source
        source: MediaSource,
    },

    /// Relay connectivity changed; links survive a transport blip
    SignalingConnectivityChanged {
        /// Whether the relay transport is up
        connected: bool,
    },

    /// Room-level error from the relay
    RoomError {
        /// Human-readable description
        message: String,
        /// Machine-readable code, when provided
        code: Option<String>,
    },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::RoomJoined { room_id } => {
                f.debug_struct("RoomJoined").field("room_id", room_id).finish()
            }
            SessionEvent::RoomLeft { room_id } => {
                f.debug_struct("RoomLeft").field("room_id", room_id).finish()
            }
            SessionEvent::ParticipantAdded(p) => {
                f.debug_tuple("ParticipantAdded").field(p).finish()
            }
            SessionEvent::ParticipantRemoved { transport_id } => f
                .debug_struct("ParticipantRemoved")
                .field("transport_id", transport_id)
                .finish(),
            SessionEvent::PeerStateChanged {
                transport_id,
                state,
            } => f
                .debug_struct("PeerStateChanged")
                .field("transport_id", transport_id)
                .field("state", state)
                .finish(),
            SessionEvent::RemoteTrackAdded {
                transport_id,
                track,
            } => f
                .debug_struct("RemoteTrackAdded")
                .field("transport_id", transport_id)
                .field("track_id", &track.id())
                .finish(),
            SessionEvent::LocalMediaChanged { source } => f
                .debug_struct("LocalMediaChanged")
                .field("source", source)
                .finish(),
            SessionEvent::SignalingConnectivityChanged { connected } => f
                .debug_struct("SignalingConnectivityChanged")
                .field("connected", connected)
                .finish(),
            SessionEvent::RoomError { message, code } => f
                .debug_struct("RoomError")
                .field("message", message)
                .field("code", code)
                .finish(),
        }
    }
}
