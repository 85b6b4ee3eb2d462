//! Local media: tracks, capture seam, and source orchestration
//!
//! Media flows one way out of this module: the host feeds encoded frames
//! into [`LocalTrack`] handles, the coordinator attaches the tracks to peer
//! links, and [`MediaController`] decides which source (camera or screen)
//! is live at any moment.

pub mod capture;
pub mod controller;
pub mod tracks;

pub use capture::{CameraCapture, CaptureDevice, ChannelCaptureDevice, ScreenCapture};
pub use controller::{MediaController, MediaSource};
pub use tracks::{LocalTrack, MediaKind};
