//! Peer link management
//!
//! One `PeerLink` per remote transport, held in a `PeerRegistry` arena.
//! Links run the offer/answer/ICE lifecycle; the registry handles
//! creation, lookup, and teardown.

pub mod link;
pub mod registry;

pub use link::{LinkState, NegotiationRole, PeerLink};
pub use registry::{PeerInfo, PeerRegistry};
