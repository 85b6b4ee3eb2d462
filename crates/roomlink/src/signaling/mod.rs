//! Signaling layer: wire protocol and relay channel
//!
//! The relay is a dumb forwarder. It delivers roster snapshots, join/leave
//! announcements, and opaque negotiation payloads between transports; all
//! session logic lives in the coordinator.

pub mod client;
pub mod protocol;

pub use client::{BackoffPolicy, SignalingChannel};
pub use protocol::{Participant, SignalKind};
