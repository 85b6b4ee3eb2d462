//! Room session orchestration
//!
//! The coordinator, the roster it maintains, and the best-effort stream
//! lifecycle notifier.

pub mod notifier;
pub mod room;
pub mod roster;

pub use notifier::{LifecycleEvent, StreamLifecycleNotifier};
pub use room::{RoomCoordinator, RoomSnapshot};
pub use roster::Roster;
