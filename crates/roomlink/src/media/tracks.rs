//! Local outbound media tracks
//!
//! A [`LocalTrack`] wraps a sample-fed RTP track with a mute gate. The host
//! feeds encoded frames (Opus for audio, VP8 for video) through the handle;
//! packetization and RTP transmission happen inside the track once it is
//! attached to peer connections. Disabling a track drops frames at the gate
//! instead of writing them, so mute never renegotiates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Opus audio
    Audio,
    /// VP8 video
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Local outbound track with a mute gate
///
/// Cloning is cheap: clones share the underlying RTP track and the enabled
/// flag, so the host can keep one handle for feeding frames while the
/// controller fans the same track out to every peer link.
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Create an Opus audio track (48 kHz stereo)
    pub fn audio(track_id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            track_id.to_string(),
            stream_id.to_string(),
        ));

        Self {
            kind: MediaKind::Audio,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a VP8 video track (90 kHz clock)
    pub fn video(track_id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            track_id.to_string(),
            stream_id.to_string(),
        ));

        Self {
            kind: MediaKind::Video,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Track kind
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        self.track.id()
    }

    /// Stream identifier the track belongs to
    pub fn stream_id(&self) -> &str {
        self.track.stream_id()
    }

    /// The underlying RTP track, for attaching to peer connections
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Enable or disable the mute gate
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether frames are currently forwarded
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Write one encoded frame
    ///
    /// Frames written while the track is disabled are silently dropped.
    /// Writing before the track is attached to any peer connection is a
    /// no-op, so hosts may start feeding before the first link exists.
    ///
    /// # Arguments
    ///
    /// * `data` - Encoded frame payload (Opus packet or VP8 frame)
    /// * `duration` - Frame duration (20ms audio frames, ~33ms video @ 30fps)
    pub async fn write_frame(&self, data: Vec<u8>, duration: Duration) -> Result<()> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let sample = Sample {
            data: data.into(),
            duration,
            timestamp: std::time::SystemTime::now(),
            ..Default::default()
        };

        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.track.id())
            .field("stream_id", &self.track.stream_id())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_track_identity() {
        let track = LocalTrack::audio("mic-0", "camera-0");
        assert_eq!(track.kind(), MediaKind::Audio);
        assert_eq!(track.id(), "mic-0");
        assert_eq!(track.stream_id(), "camera-0");
        assert!(track.is_enabled());
    }

    #[test]
    fn test_video_track_identity() {
        let track = LocalTrack::video("screen-1", "screen-1");
        assert_eq!(track.kind(), MediaKind::Video);
        assert_eq!(track.id(), "screen-1");
    }

    #[tokio::test]
    async fn test_write_frame_unbound_is_noop() {
        let track = LocalTrack::audio("mic-0", "camera-0");

        // No peer connection is attached; the frame is accepted and dropped
        track
            .write_frame(vec![0u8; 16], Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_track_drops_frames() {
        let track = LocalTrack::video("cam-0", "camera-0");

        track.set_enabled(false);
        assert!(!track.is_enabled());
        track
            .write_frame(vec![0u8; 16], Duration::from_millis(33))
            .await
            .unwrap();

        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[test]
    fn test_clones_share_mute_gate() {
        let track = LocalTrack::audio("mic-0", "camera-0");
        let handle = track.clone();

        handle.set_enabled(false);
        assert!(!track.is_enabled());
    }

    #[test]
    fn test_media_kind_display() {
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert_eq!(MediaKind::Video.to_string(), "video");
    }
}
