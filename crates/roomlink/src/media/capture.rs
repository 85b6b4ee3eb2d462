//! Capture device seam
//!
//! Platform capture (camera, microphone, screen) sits behind the
//! [`CaptureDevice`] trait so the rest of the crate never touches OS APIs.
//! The crate ships [`ChannelCaptureDevice`], a feed-driven implementation:
//! acquisition hands back [`LocalTrack`] handles the host pushes encoded
//! frames through, and a screen share ends through an explicit signal rather
//! than a real capture source going away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use super::tracks::LocalTrack;
use crate::error::{Error, Result};

/// Camera and microphone capture bundle
#[derive(Debug, Clone)]
pub struct CameraCapture {
    /// Microphone audio track
    pub audio: LocalTrack,

    /// Camera video track
    pub video: LocalTrack,
}

/// Screen capture bundle
#[derive(Debug)]
pub struct ScreenCapture {
    /// Screen video track
    pub video: LocalTrack,

    /// Flips to `true` when the share ends at the source
    pub ended: watch::Receiver<bool>,
}

/// Acquisition seam for platform capture
///
/// Implementations return fresh tracks on every acquisition, matching
/// capture sources whose track identity changes each time they are opened.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire camera + microphone
    ///
    /// # Errors
    ///
    /// `Error::MediaAccessDenied` when the user or platform refuses capture.
    async fn acquire_camera(&self) -> Result<CameraCapture>;

    /// Acquire a screen capture source
    ///
    /// The returned `ended` signal is the only way a share stops; the
    /// controller watches it and reverts to camera automatically.
    async fn acquire_screen(&self) -> Result<ScreenCapture>;
}

/// Feed-driven capture device for embedding hosts and tests
///
/// Each acquisition mints tracks with fresh identifiers. `deny_access(true)`
/// makes every acquisition fail, which exercises the receive-only join path.
pub struct ChannelCaptureDevice {
    deny: AtomicBool,
    acquisitions: AtomicU64,
    screen_ended_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl ChannelCaptureDevice {
    /// Create a device that grants every acquisition
    pub fn new() -> Self {
        Self {
            deny: AtomicBool::new(false),
            acquisitions: AtomicU64::new(0),
            screen_ended_tx: Mutex::new(None),
        }
    }

    /// Make subsequent acquisitions fail with `MediaAccessDenied`
    pub fn deny_access(&self, deny: bool) {
        self.deny.store(deny, Ordering::Release);
    }

    /// Signal that the active screen share ended at the source
    pub async fn end_screen_share(&self) {
        if let Some(tx) = self.screen_ended_tx.lock().await.as_ref() {
            let _ = tx.send(true);
        }
    }

    fn check_access(&self, what: &str) -> Result<()> {
        if self.deny.load(Ordering::Acquire) {
            return Err(Error::MediaAccessDenied(format!(
                "{} capture denied by host",
                what
            )));
        }
        Ok(())
    }
}

impl Default for ChannelCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for ChannelCaptureDevice {
    async fn acquire_camera(&self) -> Result<CameraCapture> {
        self.check_access("camera")?;

        let n = self.acquisitions.fetch_add(1, Ordering::AcqRel);
        let stream_id = format!("camera-{}", n);

        Ok(CameraCapture {
            audio: LocalTrack::audio(&format!("mic-{}", n), &stream_id),
            video: LocalTrack::video(&format!("cam-{}", n), &stream_id),
        })
    }

    async fn acquire_screen(&self) -> Result<ScreenCapture> {
        self.check_access("screen")?;

        let n = self.acquisitions.fetch_add(1, Ordering::AcqRel);
        let (ended_tx, ended_rx) = watch::channel(false);
        *self.screen_ended_tx.lock().await = Some(ended_tx);

        Ok(ScreenCapture {
            video: LocalTrack::video(&format!("screen-{}", n), &format!("screen-{}", n)),
            ended: ended_rx,
        })
    }
}
