//! Local media orchestration
//!
//! [`MediaController`] owns the local capture state: which source is active
//! and which tracks are live. Exactly one source is active at a time
//! (camera+mic or screen); switching is published on a watch channel so the
//! coordinator can replace outbound video on every live peer link without
//! renegotiating. Mute toggles flip the track gates and involve no peer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use super::capture::CaptureDevice;
use super::tracks::LocalTrack;
use crate::error::{Error, Result};

/// Active local capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    /// No local capture (receive-only endpoint)
    Inactive,
    /// Camera + microphone
    Camera,
    /// Screen video (a held microphone keeps flowing)
    Screen,
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Inactive => write!(f, "inactive"),
            MediaSource::Camera => write!(f, "camera"),
            MediaSource::Screen => write!(f, "screen"),
        }
    }
}

/// Currently held local tracks
#[derive(Debug, Default)]
struct LocalMedia {
    audio: Option<LocalTrack>,
    camera_video: Option<LocalTrack>,
    screen_video: Option<LocalTrack>,
}

/// Controller for the local capture source
///
/// Cloning shares all state, matching how the coordinator hands the
/// controller to its event loop while the host keeps a handle for toggles.
#[derive(Clone)]
pub struct MediaController {
    /// Injected capture seam
    device: Arc<dyn CaptureDevice>,

    /// Held tracks
    media: Arc<RwLock<LocalMedia>>,

    /// Source change feed; also holds the current source
    source_tx: Arc<watch::Sender<MediaSource>>,

    /// Generation counter invalidating stale share-end watchers
    screen_epoch: Arc<AtomicU64>,
}

impl MediaController {
    /// Create a controller around the injected capture device
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        let (source_tx, _) = watch::channel(MediaSource::Inactive);

        Self {
            device,
            media: Arc::new(RwLock::new(LocalMedia::default())),
            source_tx: Arc::new(source_tx),
            screen_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current capture source
    pub fn source(&self) -> MediaSource {
        *self.source_tx.borrow()
    }

    /// Subscribe to source changes
    pub fn source_watch(&self) -> watch::Receiver<MediaSource> {
        self.source_tx.subscribe()
    }

    /// Acquire camera + microphone as the local source
    ///
    /// Replaces any previously held tracks. Denial is surfaced to the
    /// caller and tolerated by the room (receive-only join).
    pub async fn acquire_camera(&self) -> Result<()> {
        let capture = self.device.acquire_camera().await?;
        info!(
            audio_track = capture.audio.id(),
            video_track = capture.video.id(),
            "Camera capture acquired"
        );

        {
            let mut media = self.media.write().await;
            media.audio = Some(capture.audio);
            media.camera_video = Some(capture.video);
            media.screen_video = None;
        }

        self.set_source(MediaSource::Camera);
        Ok(())
    }

    /// Start a screen share, replacing the outbound video source
    ///
    /// The share runs until the device reports it ended; there is no manual
    /// stop. On end the source reverts to camera automatically (or to
    /// inactive when no camera is held).
    pub async fn start_screen_share(&self) -> Result<()> {
        if self.source() == MediaSource::Screen {
            return Err(Error::InvalidState(
                "Screen share already active".to_string(),
            ));
        }

        let capture = self.device.acquire_screen().await?;
        info!(video_track = capture.video.id(), "Screen capture acquired");

        let epoch = self.screen_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        {
            let mut media = self.media.write().await;
            media.screen_video = Some(capture.video);
        }
        self.set_source(MediaSource::Screen);

        // Revert when the share ends at the source; a dropped sender
        // (device superseded or gone) counts as ended
        let controller = self.clone();
        let mut ended = capture.ended;
        tokio::spawn(async move {
            loop {
                if *ended.borrow() {
                    break;
                }
                if ended.changed().await.is_err() {
                    break;
                }
            }
            controller.on_screen_ended(epoch).await;
        });

        Ok(())
    }

    /// Handle share end for the given share generation
    async fn on_screen_ended(&self, epoch: u64) {
        if self.screen_epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        if self.source() != MediaSource::Screen {
            return;
        }

        let has_camera = {
            let mut media = self.media.write().await;
            media.screen_video = None;
            media.camera_video.is_some()
        };

        info!(revert_to_camera = has_camera, "Screen share ended");
        self.set_source(if has_camera {
            MediaSource::Camera
        } else {
            MediaSource::Inactive
        });
    }

    /// Flip the microphone gate; returns the new enabled state
    ///
    /// Returns `false` when no audio track is held.
    pub async fn toggle_audio(&self) -> bool {
        let media = self.media.read().await;
        match &media.audio {
            Some(track) => {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                debug!(enabled, "Audio toggled");
                enabled
            }
            None => false,
        }
    }

    /// Flip the active video gate; returns the new enabled state
    ///
    /// Applies to the screen track while sharing, the camera track
    /// otherwise. Returns `false` when no video track is held.
    pub async fn toggle_video(&self) -> bool {
        let media = self.media.read().await;
        let track = media.screen_video.as_ref().or(media.camera_video.as_ref());
        match track {
            Some(track) => {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                debug!(enabled, "Video toggled");
                enabled
            }
            None => false,
        }
    }

    /// The currently outbound audio track
    pub async fn audio_track(&self) -> Option<LocalTrack> {
        self.media.read().await.audio.clone()
    }

    /// The currently outbound video track (screen wins over camera)
    pub async fn video_track(&self) -> Option<LocalTrack> {
        let media = self.media.read().await;
        media
            .screen_video
            .clone()
            .or_else(|| media.camera_video.clone())
    }

    /// Drop all local capture
    pub async fn stop(&self) {
        // Invalidate any pending share-end watcher
        self.screen_epoch.fetch_add(1, Ordering::AcqRel);

        {
            let mut media = self.media.write().await;
            media.audio = None;
            media.camera_video = None;
            media.screen_video = None;
        }

        self.set_source(MediaSource::Inactive);
        debug!("Local media stopped");
    }

    fn set_source(&self, source: MediaSource) {
        self.source_tx.send_replace(source);
    }
}
