//! Peer-to-peer room sessions over a WebSocket signaling relay
//!
//! This crate coordinates full-mesh WebRTC rooms: membership over a
//! signaling relay, one negotiated peer connection per remote participant,
//! and local camera/screen capture fanned out to every link.
//!
//! # Features
//!
//! - **Full-mesh topology**: one `PeerLink` per remote transport, joiners
//!   initiate toward the roster snapshot, existing members answer
//! - **Connection lifecycle**: disconnect grace window, single automatic
//!   ICE restart on failure, out-of-order signal tolerance
//! - **Media switching**: camera/screen swap via sender-level track
//!   replacement, no renegotiation
//! - **Resilient signaling**: reconnect with exponential backoff; peer
//!   links survive relay blips
//! - **Served ICE configuration**: fetched over HTTP with a built-in STUN
//!   fallback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Host application                                        │
//! │  ↓ join/leave + toggles        ↑ SessionEvent stream     │
//! │  RoomCoordinator (event loop, sole session mutator)      │
//! │  ├─ SignalingChannel (WebSocket relay, reconnects)       │
//! │  ├─ PeerRegistry (arena of PeerLinks)                    │
//! │  │   └─ PeerLink state machine (offer/answer/ICE)        │
//! │  ├─ MediaController (camera/screen capture, mute gates)  │
//! │  ├─ IceConfigLoader (served config, STUN fallback)       │
//! │  └─ StreamLifecycleNotifier (best-effort start/stop)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use roomlink::CoordinatorConfig;
//!
//! let config = CoordinatorConfig::new("ws://localhost:8080/ws").with_max_peers(8);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_peers, 8);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use roomlink::{ChannelCaptureDevice, CoordinatorConfig, RoomCoordinator};
//!
//! # async fn example() -> roomlink::Result<()> {
//! let device = Arc::new(ChannelCaptureDevice::new());
//! let config = CoordinatorConfig::new("wss://relay.example.com/ws");
//! let coordinator = Arc::new(RoomCoordinator::new(config, device)?);
//!
//! let mut events = coordinator.take_event_receiver().await.unwrap();
//! let runner = Arc::clone(&coordinator);
//! tokio::spawn(async move { runner.run().await });
//!
//! coordinator.join_room("standup", "alice").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{CoordinatorConfig, IceConfigLoader, IceSettings};
pub use error::{Error, Result};
pub use events::{LinkEvent, SessionEvent, SignalingEvent};
pub use media::{
    CameraCapture, CaptureDevice, ChannelCaptureDevice, LocalTrack, MediaController, MediaKind,
    MediaSource, ScreenCapture,
};
pub use peer::{LinkState, NegotiationRole, PeerInfo, PeerLink, PeerRegistry};
pub use session::{RoomCoordinator, RoomSnapshot, StreamLifecycleNotifier};
pub use signaling::{Participant, SignalKind, SignalingChannel};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
