//! Per-peer connection state machine
//!
//! A `PeerLink` owns one RTCPeerConnection toward one remote transport and
//! runs its negotiation lifecycle: `new -> negotiating -> connected`, with a
//! grace window on `disconnected`, a single automatic ICE restart on
//! `failed`, and a terminal `closed`. Links never talk to the signaling
//! channel directly; every outbound signal is published as a `LinkEvent`
//! for the coordinator to relay.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::events::LinkEvent;
use crate::media::MediaKind;
use crate::signaling::protocol::SignalKind;

/// Which side of the pair drives negotiation
///
/// The endpoint already in the room when the other joins is the responder;
/// the joining endpoint initiates toward everyone in its roster snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Creates the first offer (and any ICE-restart offers)
    Initiator,
    /// Answers offers from the initiator
    Responder,
}

impl fmt::Display for NegotiationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationRole::Initiator => write!(f, "initiator"),
            NegotiationRole::Responder => write!(f, "responder"),
        }
    }
}

/// Connection state of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no negotiation yet
    New,
    /// Offer/answer exchange in flight
    Negotiating,
    /// Media is flowing
    Connected,
    /// Transport blip, holding through the grace window
    Disconnected,
    /// Transport failure, awaiting ICE restart or teardown
    Failed,
    /// Terminal; the link is never reused
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::New => write!(f, "new"),
            LinkState::Negotiating => write!(f, "negotiating"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Failed => write!(f, "failed"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// One peer-to-peer connection and its negotiation lifecycle
pub struct PeerLink {
    transport_id: String,
    role: NegotiationRole,
    config: CoordinatorConfig,
    peer_connection: Arc<RTCPeerConnection>,
    state: Arc<RwLock<LinkState>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,

    /// Candidates that arrived before the remote description
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    remote_description_set: AtomicBool,
    retry_sweep_running: AtomicBool,

    /// Bumped whenever a pending grace/failure timer must be invalidated
    timer_epoch: AtomicU64,
    /// One automatic ICE restart per failure, re-armed on reconnection
    ice_restart_used: AtomicBool,
    closed: AtomicBool,

    audio_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    video_sender: RwLock<Option<Arc<RTCRtpSender>>>,
    connected_at: RwLock<Option<SystemTime>>,
    created_at: SystemTime,
}

impl PeerLink {
    /// Create a link toward `transport_id` and wire up its transport callbacks
    ///
    /// Local tracks are attached before any offer is generated so the first
    /// negotiation already carries the media sections. When a direction has
    /// no local track a receive-only transceiver is added instead, keeping
    /// the link able to receive remote media.
    ///
    /// An initiator link schedules its first offer after the configured
    /// delay; a responder link waits for the remote offer.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        transport_id: &str,
        role: NegotiationRole,
        rtc_config: RTCConfiguration,
        config: &CoordinatorConfig,
        audio_track: Option<Arc<TrackLocalStaticSample>>,
        video_track: Option<Arc<TrackLocalStaticSample>>,
        events_tx: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let link = Arc::new(Self {
            transport_id: transport_id.to_string(),
            role,
            config: config.clone(),
            peer_connection,
            state: Arc::new(RwLock::new(LinkState::New)),
            events_tx,
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            retry_sweep_running: AtomicBool::new(false),
            timer_epoch: AtomicU64::new(0),
            ice_restart_used: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            audio_sender: RwLock::new(None),
            video_sender: RwLock::new(None),
            connected_at: RwLock::new(None),
            created_at: SystemTime::now(),
        });

        match audio_track {
            Some(track) => link.attach_track(MediaKind::Audio, track).await?,
            None => link.add_recv_transceiver(RTPCodecType::Audio).await?,
        }
        match video_track {
            Some(track) => link.attach_track(MediaKind::Video, track).await?,
            None => link.add_recv_transceiver(RTPCodecType::Video).await?,
        }

        link.register_handlers();

        info!(
            peer = %link.transport_id,
            role = %link.role,
            "Peer link created"
        );

        if role == NegotiationRole::Initiator {
            let delay = config.initiator_offer_delay();
            let link_clone = Arc::clone(&link);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                link_clone.begin_negotiation().await;
            });
        }

        Ok(link)
    }

    /// Transport this link points at
    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    /// Negotiation role of the local side
    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    /// Current link state
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// Whether `close` has run (or the transport closed underneath us)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Time since the link last reached `connected`
    pub async fn connection_duration(&self) -> Option<Duration> {
        let connected_at = self.connected_at.read().await;
        connected_at.and_then(|t| t.elapsed().ok())
    }

    /// Age of the link since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Number of ICE candidates buffered while waiting for the remote
    /// description
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    /// Apply a negotiation signal received from the remote peer
    pub async fn apply_signal(
        self: &Arc<Self>,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "Link to {} is closed",
                self.transport_id
            )));
        }

        match kind {
            SignalKind::Offer => self.apply_offer(payload).await,
            SignalKind::Answer => self.apply_answer(payload).await,
            SignalKind::IceCandidate => self.apply_candidate(payload).await,
        }
    }

    /// Point the outbound sender for `kind` at `track`
    ///
    /// Replaces the current track when a sender exists; otherwise a new
    /// sender is attached. An unchanged track is a no-op. A sender added
    /// after the initial exchange stays dormant until the next negotiation
    /// cycle picks it up.
    pub async fn sync_outbound_track(
        &self,
        kind: MediaKind,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()> {
        let slot = match kind {
            MediaKind::Audio => &self.audio_sender,
            MediaKind::Video => &self.video_sender,
        };

        let existing = slot.read().await.clone();
        match existing {
            Some(sender) => {
                let unchanged = sender
                    .track()
                    .await
                    .map(|current| current.id() == track.id())
                    .unwrap_or(false);
                if unchanged {
                    return Ok(());
                }
                sender
                    .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                    .map_err(|e| {
                        Error::MediaTrackError(format!("Failed to replace {} track: {}", kind, e))
                    })?;
                debug!(peer = %self.transport_id, kind = %kind, "Outbound track replaced");
                Ok(())
            }
            None => {
                self.attach_track(kind, track).await?;
                debug!(peer = %self.transport_id, kind = %kind, "Outbound sender added");
                Ok(())
            }
        }
    }

    /// Tear the link down
    ///
    /// Idempotent; emits a single `closed` state change on the first call.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(peer = %self.transport_id, "Closing peer link");
        self.timer_epoch.fetch_add(1, Ordering::SeqCst);
        self.transition(LinkState::Closed).await;

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }

    // ---- transport callbacks -------------------------------------------

    fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(link) = weak.upgrade() {
                        link.handle_transport_state(s).await;
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let (link, candidate) = match (weak.upgrade(), candidate) {
                        (Some(link), Some(candidate)) => (link, candidate),
                        _ => return,
                    };
                    match candidate.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(payload) => link.emit(LinkEvent::OutboundSignal {
                                transport_id: link.transport_id.clone(),
                                kind: SignalKind::IceCandidate,
                                payload,
                            }),
                            Err(e) => {
                                warn!(peer = %link.transport_id, error = %e, "Failed to serialize ICE candidate")
                            }
                        },
                        Err(e) => {
                            warn!(peer = %link.transport_id, error = %e, "Failed to convert ICE candidate")
                        }
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(link) = weak.upgrade() {
                        info!(
                            peer = %link.transport_id,
                            track_id = %track.id(),
                            kind = %track.kind(),
                            "Remote track received"
                        );
                        link.emit(LinkEvent::RemoteTrack {
                            transport_id: link.transport_id.clone(),
                            track,
                        });
                    }
                })
            },
        ));
    }

    /// Map an RTCPeerConnection state change onto the link state machine
    pub(crate) async fn handle_transport_state(
        self: &Arc<Self>,
        transport_state: RTCPeerConnectionState,
    ) {
        if self.is_closed() {
            return;
        }

        debug!(
            peer = %self.transport_id,
            transport_state = %transport_state,
            "Transport state change"
        );

        match transport_state {
            RTCPeerConnectionState::Connecting => {
                if self.state().await == LinkState::New {
                    self.transition(LinkState::Negotiating).await;
                }
            }
            RTCPeerConnectionState::Connected => {
                self.timer_epoch.fetch_add(1, Ordering::SeqCst);
                self.ice_restart_used.store(false, Ordering::SeqCst);
                self.transition(LinkState::Connected).await;
            }
            RTCPeerConnectionState::Disconnected => {
                if self.state().await == LinkState::Connected {
                    self.transition(LinkState::Disconnected).await;
                    self.start_grace_timer();
                }
            }
            RTCPeerConnectionState::Failed => {
                self.transition(LinkState::Failed).await;
                self.handle_failure().await;
            }
            RTCPeerConnectionState::Closed => {
                if let Err(e) = self.close().await {
                    warn!(peer = %self.transport_id, error = %e, "Error closing link");
                }
            }
            _ => {}
        }
    }

    async fn handle_failure(self: &Arc<Self>) {
        match self.role {
            NegotiationRole::Initiator => {
                if self.ice_restart_used.swap(true, Ordering::SeqCst) {
                    warn!(
                        peer = %self.transport_id,
                        "ICE restart already attempted, closing link"
                    );
                    if let Err(e) = self.close().await {
                        warn!(peer = %self.transport_id, error = %e, "Error closing link");
                    }
                } else {
                    let link = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = link.restart_ice().await {
                            warn!(peer = %link.transport_id, error = %e, "ICE restart failed");
                            if let Err(e) = link.close().await {
                                warn!(peer = %link.transport_id, error = %e, "Error closing link");
                            }
                        }
                    });
                }
            }
            // The responder holds the failed link open for one grace window,
            // waiting for the initiator's restart offer to arrive
            NegotiationRole::Responder => self.start_failure_timer(),
        }
    }

    async fn restart_ice(&self) -> Result<()> {
        info!(peer = %self.transport_id, "Attempting ICE restart");
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        self.send_offer(Some(options)).await
    }

    fn start_grace_timer(self: &Arc<Self>) {
        let epoch = self.timer_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let grace = self.config.disconnect_grace();
        let link = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if link.timer_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if link.state().await == LinkState::Disconnected {
                warn!(
                    peer = %link.transport_id,
                    grace_ms = grace.as_millis() as u64,
                    "Disconnect grace window expired, closing link"
                );
                if let Err(e) = link.close().await {
                    warn!(peer = %link.transport_id, error = %e, "Error closing link");
                }
            }
        });
    }

    fn start_failure_timer(self: &Arc<Self>) {
        let epoch = self.timer_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let window = self.config.disconnect_grace();
        let link = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if link.timer_epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if link.state().await == LinkState::Failed {
                warn!(peer = %link.transport_id, "Link failed without recovery, closing");
                if let Err(e) = link.close().await {
                    warn!(peer = %link.transport_id, error = %e, "Error closing link");
                }
            }
        });
    }

    // ---- negotiation ---------------------------------------------------

    async fn begin_negotiation(&self) {
        if self.is_closed() {
            return;
        }
        self.transition(LinkState::Negotiating).await;
        if let Err(e) = self.send_offer(None).await {
            warn!(peer = %self.transport_id, error = %e, "Failed to create initial offer");
        }
    }

    async fn send_offer(&self, options: Option<RTCOfferOptions>) -> Result<()> {
        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after offer".to_string()))?;

        self.emit(LinkEvent::OutboundSignal {
            transport_id: self.transport_id.clone(),
            kind: SignalKind::Offer,
            payload: serde_json::json!({ "type": "offer", "sdp": local.sdp }),
        });
        Ok(())
    }

    async fn apply_offer(self: &Arc<Self>, payload: serde_json::Value) -> Result<()> {
        let sdp = extract_sdp(&payload)?;

        if self.state().await == LinkState::New {
            self.transition(LinkState::Negotiating).await;
        }

        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        self.mark_remote_description().await;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after answer".to_string()))?;

        self.emit(LinkEvent::OutboundSignal {
            transport_id: self.transport_id.clone(),
            kind: SignalKind::Answer,
            payload: serde_json::json!({ "type": "answer", "sdp": local.sdp }),
        });
        Ok(())
    }

    async fn apply_answer(&self, payload: serde_json::Value) -> Result<()> {
        let sdp = extract_sdp(&payload)?;

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        self.mark_remote_description().await;
        Ok(())
    }

    async fn apply_candidate(self: &Arc<Self>, payload: serde_json::Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(payload)
            .map_err(|e| Error::IceCandidateError(format!("Failed to parse ICE candidate: {}", e)))?;

        if self.remote_description_set.load(Ordering::SeqCst) {
            return self.add_candidate(init).await;
        }

        debug!(
            peer = %self.transport_id,
            "Buffering ICE candidate until remote description is set"
        );
        self.pending_candidates.lock().await.push(init);
        self.schedule_candidate_retry();
        Ok(())
    }

    async fn add_candidate(&self, init: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn mark_remote_description(&self) {
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.drain_pending_candidates().await;
    }

    async fn drain_pending_candidates(&self) {
        let pending: Vec<RTCIceCandidateInit> = {
            let mut buffer = self.pending_candidates.lock().await;
            buffer.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }

        debug!(
            peer = %self.transport_id,
            count = pending.len(),
            "Draining buffered ICE candidates"
        );
        for init in pending {
            if let Err(e) = self.add_candidate(init).await {
                warn!(peer = %self.transport_id, error = %e, "Failed to apply buffered ICE candidate");
            }
        }
    }

    /// Retry sweep for candidates buffered without a remote description
    ///
    /// Runs at most one sweeper per link. Each pass waits the configured
    /// delay; candidates still unapplied after the attempt budget are
    /// dropped rather than held forever.
    fn schedule_candidate_retry(self: &Arc<Self>) {
        if self.retry_sweep_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let link = Arc::clone(self);
        tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                tokio::time::sleep(link.config.candidate_retry_delay()).await;
                if link.is_closed() {
                    break;
                }
                if link.remote_description_set.load(Ordering::SeqCst) {
                    link.drain_pending_candidates().await;
                    break;
                }
                attempts += 1;
                if attempts >= link.config.candidate_retry_max {
                    let dropped = link.pending_candidates.lock().await.drain(..).count();
                    if dropped > 0 {
                        warn!(
                            peer = %link.transport_id,
                            dropped,
                            "Dropping buffered ICE candidates, remote description never arrived"
                        );
                    }
                    break;
                }
            }
            link.retry_sweep_running.store(false, Ordering::SeqCst);
        });
    }

    // ---- internals -----------------------------------------------------

    async fn attach_track(
        &self,
        kind: MediaKind,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add {} track: {}", kind, e)))?;

        match kind {
            MediaKind::Audio => *self.audio_sender.write().await = Some(sender),
            MediaKind::Video => *self.video_sender.write().await = Some(sender),
        }
        Ok(())
    }

    async fn add_recv_transceiver(&self, kind: RTPCodecType) -> Result<()> {
        let init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        };
        self.peer_connection
            .add_transceiver_from_kind(kind, Some(init))
            .await
            .map_err(|e| {
                Error::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e))
            })?;
        Ok(())
    }

    async fn transition(&self, new_state: LinkState) {
        let old = {
            let mut state = self.state.write().await;
            let old = *state;
            if old == new_state || old == LinkState::Closed {
                return;
            }
            *state = new_state;
            old
        };

        info!(
            peer = %self.transport_id,
            from = %old,
            to = %new_state,
            "Link state changed"
        );

        if new_state == LinkState::Connected {
            *self.connected_at.write().await = Some(SystemTime::now());
        }

        self.emit(LinkEvent::StateChanged {
            transport_id: self.transport_id.clone(),
            state: new_state,
        });
    }

    fn emit(&self, event: LinkEvent) {
        if self.events_tx.send(event).is_err() {
            debug!(peer = %self.transport_id, "Link event receiver dropped");
        }
    }
}

fn extract_sdp(payload: &serde_json::Value) -> Result<String> {
    payload
        .get("sdp")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::SdpError("Signal payload missing sdp".to_string()))
}
