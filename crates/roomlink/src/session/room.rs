//! Room session orchestration
//!
//! `RoomCoordinator` wires the signaling channel, peer registry, and media
//! controller together and runs the event loop that is the only writer of
//! the `RoomSession` aggregate. Host applications observe the session
//! through a `SessionEvent` stream (taken once) and point-in-time
//! `snapshot()`s; they never touch links or the channel directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

use crate::config::{CoordinatorConfig, IceConfigLoader, IceSettings};
use crate::error::{Error, Result};
use crate::events::{LinkEvent, SessionEvent, SignalingEvent};
use crate::media::{CaptureDevice, MediaController};
use crate::peer::{LinkState, NegotiationRole, PeerRegistry};
use crate::session::notifier::StreamLifecycleNotifier;
use crate::session::roster::Roster;
use crate::signaling::protocol::Participant;
use crate::signaling::SignalingChannel;

/// Mutable state of the room currently joined
struct RoomSession {
    room_id: String,
    user_id: String,
    joined_at: SystemTime,
    channel: Arc<SignalingChannel>,
    roster: Roster,
    signaling_connected: bool,
    /// True once the transport has completed a handshake; a later
    /// `Connected` is a reconnect and gets a fresh transport identity
    was_connected: bool,
    link_states: HashMap<String, LinkState>,
    remote_tracks: HashMap<String, Vec<Arc<TrackRemote>>>,
}

/// Point-in-time view of the active room session
#[derive(Clone)]
pub struct RoomSnapshot {
    /// Room identifier
    pub room_id: String,
    /// Local user identity
    pub user_id: String,
    /// When the local endpoint joined
    pub joined_at: SystemTime,
    /// Whether the relay transport is currently up
    pub signaling_connected: bool,
    /// Active local capture source
    pub media_source: crate::media::MediaSource,
    /// Everyone visible in the room
    pub participants: Vec<Participant>,
    /// Last observed state per peer link
    pub peer_states: HashMap<String, LinkState>,
    /// Remote tracks received so far, per transport
    pub remote_tracks: HashMap<String, Vec<Arc<TrackRemote>>>,
}

impl fmt::Debug for RoomSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let track_counts: HashMap<&String, usize> = self
            .remote_tracks
            .iter()
            .map(|(t, tracks)| (t, tracks.len()))
            .collect();
        f.debug_struct("RoomSnapshot")
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .field("signaling_connected", &self.signaling_connected)
            .field("media_source", &self.media_source)
            .field("participants", &self.participants.len())
            .field("peer_states", &self.peer_states)
            .field("remote_tracks", &track_counts)
            .finish()
    }
}

/// Top-level coordinator for one endpoint's room membership
///
/// Construct once, spawn [`run`](RoomCoordinator::run), then drive it with
/// `join_room`/`leave_room` and the media controller. All session mutation
/// funnels through the event loop; host-facing methods only stage work for
/// it or read snapshots.
pub struct RoomCoordinator {
    config: CoordinatorConfig,
    ice_loader: Arc<IceConfigLoader>,
    ice_settings: RwLock<Option<IceSettings>>,
    media: MediaController,
    notifier: Arc<StreamLifecycleNotifier>,
    registry: Arc<PeerRegistry>,

    session: RwLock<Option<RoomSession>>,

    /// Cloned into each signaling channel so the bus outlives reconnect cycles
    signaling_events_tx: mpsc::UnboundedSender<SignalingEvent>,
    signaling_events_rx: Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    link_events_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,

    session_events_tx: mpsc::UnboundedSender<SessionEvent>,
    session_events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RoomCoordinator {
    /// Create a coordinator using `device` for local capture
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration fails validation.
    pub fn new(config: CoordinatorConfig, device: Arc<dyn CaptureDevice>) -> Result<Self> {
        config.validate()?;

        let (signaling_events_tx, signaling_events_rx) = mpsc::unbounded_channel();
        let (link_events_tx, link_events_rx) = mpsc::unbounded_channel();
        let (session_events_tx, session_events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let ice_loader = Arc::new(IceConfigLoader::new(
            config.ice_config_url.clone(),
            request_timeout,
        ));
        let notifier = Arc::new(StreamLifecycleNotifier::new(
            config.lifecycle_url.clone(),
            request_timeout,
        ));
        let registry = Arc::new(PeerRegistry::new(config.clone(), link_events_tx));
        let media = MediaController::new(device);

        Ok(Self {
            config,
            ice_loader,
            ice_settings: RwLock::new(None),
            media,
            notifier,
            registry,
            session: RwLock::new(None),
            signaling_events_tx,
            signaling_events_rx: Mutex::new(Some(signaling_events_rx)),
            link_events_rx: Mutex::new(Some(link_events_rx)),
            session_events_tx,
            session_events_rx: Mutex::new(Some(session_events_rx)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Handle to the local media controller
    pub fn media(&self) -> MediaController {
        self.media.clone()
    }

    /// Registry snapshot for observability
    pub async fn peers(&self) -> Vec<crate::peer::PeerInfo> {
        self.registry.snapshot().await
    }

    /// Take the host-facing event stream
    ///
    /// Yields `Some` exactly once; subsequent calls return None.
    pub async fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.session_events_rx.lock().await.take()
    }

    /// Point-in-time view of the active session, None when not in a room
    pub async fn snapshot(&self) -> Option<RoomSnapshot> {
        let session = self.session.read().await;
        let active = session.as_ref()?;
        Some(RoomSnapshot {
            room_id: active.room_id.clone(),
            user_id: active.user_id.clone(),
            joined_at: active.joined_at,
            signaling_connected: active.signaling_connected,
            media_source: self.media.source(),
            participants: active.roster.participants(),
            peer_states: active.link_states.clone(),
            remote_tracks: active.remote_tracks.clone(),
        })
    }

    /// Join a room as `user_id`
    ///
    /// Loads ICE settings on first use, acquires local media best-effort
    /// (capture denial downgrades to a receive-only session), and completes
    /// the relay handshake before returning; the join announcement and mesh
    /// build-out then proceed through the event loop.
    ///
    /// # Errors
    ///
    /// Fails fast with `InvalidState` when already in a room; an explicit
    /// `leave_room` is required first. A failed handshake rejects the join
    /// and releases any capture acquired for it; retrying is the caller's
    /// decision.
    pub async fn join_room(&self, room_id: &str, user_id: &str) -> Result<()> {
        {
            let session = self.session.read().await;
            if let Some(active) = session.as_ref() {
                return Err(Error::InvalidState(format!(
                    "Already in room {}, leave it first",
                    active.room_id
                )));
            }
        }

        info!(room = %room_id, user = %user_id, "Joining room");

        // Links must never see unconfigured ICE
        self.ensure_ice_settings().await;

        if let Err(e) = self.media.acquire_camera().await {
            if e.is_media_error() {
                warn!(error = %e, "Local media unavailable, joining receive-only");
            } else {
                return Err(e);
            }
        }

        let channel = Arc::new(SignalingChannel::new(
            &self.config,
            self.signaling_events_tx.clone(),
        ));
        if let Err(e) = channel.connect().await {
            warn!(error = %e, "Relay handshake failed, abandoning join");
            self.media.stop().await;
            return Err(e);
        }

        // Session goes in before the supervisor starts so the Connected
        // event always finds it
        {
            let mut session = self.session.write().await;
            *session = Some(RoomSession {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                joined_at: SystemTime::now(),
                channel: Arc::clone(&channel),
                roster: Roster::new(),
                signaling_connected: false,
                was_connected: false,
                link_states: HashMap::new(),
                remote_tracks: HashMap::new(),
            });
        }

        tokio::spawn(async move { channel.run().await });

        self.notifier
            .notify_started(room_id, user_id, &self.media.source().to_string());
        self.emit(SessionEvent::RoomJoined {
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    /// Leave the current room
    ///
    /// Closes every peer link, stops local capture, closes the signaling
    /// transport (the relay infers departure from the disconnect), and
    /// posts the stream-stop lifecycle event. A no-op when not in a room.
    pub async fn leave_room(&self) -> Result<()> {
        let active = self.session.write().await.take();
        let active = match active {
            Some(active) => active,
            None => {
                debug!("leave_room with no active session");
                return Ok(());
            }
        };

        info!(room = %active.room_id, "Leaving room");

        self.registry.close_all().await;

        let last_source = self.media.source();
        self.media.stop().await;

        active.channel.close();

        self.notifier.notify_stopped(
            &active.room_id,
            &active.user_id,
            &last_source.to_string(),
        );
        self.emit(SessionEvent::RoomLeft {
            room_id: active.room_id,
        });
        Ok(())
    }

    /// Request shutdown of the event loop
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Event loop: the sole mutator of session state
    ///
    /// Consumes the signaling and link buses plus local media source
    /// changes. Intended to be spawned once; a second call logs and
    /// returns. Exits on `close()`, leaving the room on the way out.
    pub async fn run(&self) {
        let mut signaling_events = match self.signaling_events_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("Coordinator event loop already running");
                return;
            }
        };
        let mut link_events = match self.link_events_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("Coordinator event loop already running");
                return;
            }
        };
        let mut source_watch = self.media.source_watch();
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Room coordinator started");

        loop {
            tokio::select! {
                Some(event) = signaling_events.recv() => {
                    self.handle_signaling_event(event).await;
                }
                Some(event) = link_events.recv() => {
                    self.handle_link_event(event).await;
                }
                changed = source_watch.changed() => {
                    if changed.is_ok() {
                        self.handle_source_change().await;
                    }
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        if let Err(e) = self.leave_room().await {
            warn!(error = %e, "Error leaving room during shutdown");
        }
        info!("Room coordinator stopped");
    }

    // ---- signaling bus -------------------------------------------------

    async fn handle_signaling_event(&self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => self.handle_signaling_connected().await,
            SignalingEvent::Roster(participants) => {
                info!(count = participants.len(), "Roster snapshot received");
                for participant in participants {
                    self.admit_participant(participant, NegotiationRole::Initiator)
                        .await;
                }
            }
            SignalingEvent::ParticipantJoined(participant) => {
                self.admit_participant(participant, NegotiationRole::Responder)
                    .await;
            }
            SignalingEvent::ParticipantLeft { transport_id } => {
                self.handle_participant_left(&transport_id).await;
            }
            SignalingEvent::Signal {
                from,
                kind,
                payload,
            } => {
                self.handle_inbound_signal(&from, kind, payload).await;
            }
            SignalingEvent::RoomError { message, code } => {
                warn!(message = %message, code = ?code, "Room error from relay");
                self.emit(SessionEvent::RoomError { message, code });
            }
            SignalingEvent::Disconnected { reason } => {
                let in_session = {
                    let mut session = self.session.write().await;
                    match session.as_mut() {
                        Some(active) => {
                            active.signaling_connected = false;
                            true
                        }
                        None => false,
                    }
                };
                if in_session {
                    warn!(reason = %reason, "Signaling transport lost, peer links preserved");
                    self.emit(SessionEvent::SignalingConnectivityChanged { connected: false });
                }
            }
        }
    }

    /// Announce presence on every transport connect
    ///
    /// Covers both the initial handshake and reconnects: re-announcing the
    /// same identity refreshes the relay's view, and surviving links are
    /// reconciled when the fresh roster snapshot arrives.
    async fn handle_signaling_connected(&self) {
        let staged = {
            let mut session = self.session.write().await;
            match session.as_mut() {
                Some(active) => {
                    let reconnect = active.was_connected;
                    active.was_connected = true;
                    active.signaling_connected = true;
                    let stale = if reconnect {
                        // The relay issues a new transport id per handshake, so
                        // links negotiated under the old one are unreachable for
                        // further signals. Tear them down and let the fresh
                        // roster rebuild the mesh.
                        let stale = active.roster.participants();
                        active.roster.clear();
                        active.link_states.clear();
                        active.remote_tracks.clear();
                        stale
                    } else {
                        Vec::new()
                    };
                    Some((
                        active.room_id.clone(),
                        active.user_id.clone(),
                        Arc::clone(&active.channel),
                        reconnect,
                        stale,
                    ))
                }
                None => None,
            }
        };

        let (room_id, user_id, channel, reconnect, stale) = match staged {
            Some(staged) => staged,
            None => return,
        };

        if reconnect {
            info!(room = %room_id, "Signaling reconnected, rebuilding peer mesh");
            self.registry.close_all().await;
            for participant in stale {
                self.emit(SessionEvent::ParticipantRemoved {
                    transport_id: participant.transport_id,
                });
            }
        } else {
            info!(room = %room_id, "Signaling connected, announcing presence");
        }

        if let Err(e) = channel.join_room(&room_id, &user_id) {
            warn!(room = %room_id, error = %e, "Failed to announce join");
        }
        self.emit(SessionEvent::SignalingConnectivityChanged { connected: true });
    }

    /// Record a participant and make sure a link toward them exists
    async fn admit_participant(&self, participant: Participant, role: NegotiationRole) {
        let transport_id = participant.transport_id.clone();

        let admitted = {
            let mut session = self.session.write().await;
            match session.as_mut() {
                Some(active) => {
                    let already_present = active.roster.contains(&transport_id);
                    let evicted = active.roster.insert(participant.clone());
                    Some((already_present, evicted))
                }
                None => None,
            }
        };

        let (already_present, evicted) = match admitted {
            Some(admitted) => admitted,
            None => return,
        };

        // Same user back on a fresh transport: last join wins
        if let Some(stale) = evicted {
            info!(
                user = %stale.user_id,
                old = %stale.transport_id,
                new = %transport_id,
                "User rejoined on a new transport, evicting stale entry"
            );
            self.drop_peer(&stale.transport_id).await;
            self.emit(SessionEvent::ParticipantRemoved {
                transport_id: stale.transport_id,
            });
        }

        if !already_present {
            info!(
                user = %participant.user_id,
                peer = %transport_id,
                role = %role,
                "Participant admitted"
            );
            self.emit(SessionEvent::ParticipantAdded(participant));
        }

        // An early signal may have built the responder link already
        if self.registry.contains(&transport_id).await {
            debug!(peer = %transport_id, "Link already exists for participant");
            return;
        }
        if let Err(e) = self.create_link(&transport_id, role).await {
            warn!(peer = %transport_id, error = %e, "Failed to create peer link");
            return;
        }

        // The room may have been left while the link was being built
        if self.session.read().await.is_none() {
            debug!(peer = %transport_id, "Session ended during link setup, discarding");
            self.drop_peer(&transport_id).await;
        }
    }

    async fn handle_participant_left(&self, transport_id: &str) {
        info!(peer = %transport_id, "Participant left");

        // Link first, then bookkeeping, so no signal races into a dead entry
        self.drop_peer(transport_id).await;

        let known = {
            let mut session = self.session.write().await;
            match session.as_mut() {
                Some(active) => active.roster.remove(transport_id).is_some(),
                None => false,
            }
        };

        if known {
            self.emit(SessionEvent::ParticipantRemoved {
                transport_id: transport_id.to_string(),
            });
        }
    }

    async fn handle_inbound_signal(
        &self,
        from: &str,
        kind: crate::signaling::SignalKind,
        payload: serde_json::Value,
    ) {
        // Frames queued on the bus can outlive the session they belonged to
        if self.session.read().await.is_none() {
            debug!(peer = %from, kind = %kind, "Dropping signal, not in a room");
            return;
        }

        let link = match self.registry.get(from).await {
            Some(link) => link,
            None => {
                // Offers and candidates can outrun the user-joined notice
                debug!(
                    peer = %from,
                    kind = %kind,
                    "Signal from unknown peer, creating responder link"
                );
                match self.create_link(from, NegotiationRole::Responder).await {
                    Ok(link) => link,
                    Err(e) => {
                        warn!(peer = %from, error = %e, "Failed to create responder link");
                        return;
                    }
                }
            }
        };

        // The room may have been left while the link was being built
        if self.session.read().await.is_none() {
            debug!(peer = %from, "Session ended during link setup, discarding");
            self.drop_peer(from).await;
            return;
        }

        if let Err(e) = link.apply_signal(kind, payload).await {
            warn!(peer = %from, kind = %kind, error = %e, "Failed to apply signal");
        }
    }

    // ---- link bus ------------------------------------------------------

    async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::OutboundSignal {
                transport_id,
                kind,
                payload,
            } => {
                let channel = {
                    let session = self.session.read().await;
                    session.as_ref().map(|active| Arc::clone(&active.channel))
                };
                match channel {
                    Some(channel) => {
                        if let Err(e) = channel.send_signal(&transport_id, kind, payload) {
                            warn!(peer = %transport_id, error = %e, "Failed to relay signal");
                        }
                    }
                    None => debug!(peer = %transport_id, "Dropping signal, no active session"),
                }
            }
            LinkEvent::StateChanged {
                transport_id,
                state,
            } => {
                let in_session = {
                    let mut session = self.session.write().await;
                    match session.as_mut() {
                        Some(active) => {
                            // The state map tracks current participants only; a
                            // terminal event for a transport that already left
                            // must not resurrect its entry
                            if active.roster.contains(&transport_id) {
                                active.link_states.insert(transport_id.clone(), state);
                            }
                            if state == LinkState::Closed {
                                active.remote_tracks.remove(&transport_id);
                            }
                            true
                        }
                        None => false,
                    }
                };

                if state == LinkState::Closed {
                    // Self-closed links (grace expiry, failure) leave the arena
                    if let Err(e) = self.registry.remove(&transport_id).await {
                        warn!(peer = %transport_id, error = %e, "Error removing closed link");
                    }
                }

                if in_session {
                    self.emit(SessionEvent::PeerStateChanged {
                        transport_id,
                        state,
                    });
                }
            }
            LinkEvent::RemoteTrack {
                transport_id,
                track,
            } => {
                let in_session = {
                    let mut session = self.session.write().await;
                    match session.as_mut() {
                        Some(active) => {
                            active
                                .remote_tracks
                                .entry(transport_id.clone())
                                .or_default()
                                .push(Arc::clone(&track));
                            true
                        }
                        None => false,
                    }
                };

                if in_session {
                    self.emit(SessionEvent::RemoteTrackAdded {
                        transport_id,
                        track,
                    });
                }
            }
        }
    }

    // ---- media ---------------------------------------------------------

    /// Fan a source change out to every link via sender-level track updates
    async fn handle_source_change(&self) {
        let source = self.media.source();
        info!(source = %source, "Local media source changed");

        let audio = self.media.audio_track().await.map(|t| t.rtp_track());
        let video = self.media.video_track().await.map(|t| t.rtp_track());
        if audio.is_some() || video.is_some() {
            self.registry.sync_outbound_tracks(audio, video).await;
        }

        self.emit(SessionEvent::LocalMediaChanged { source });
    }

    // ---- internals -----------------------------------------------------

    async fn ensure_ice_settings(&self) -> IceSettings {
        {
            let cached = self.ice_settings.read().await;
            if let Some(settings) = cached.as_ref() {
                return settings.clone();
            }
        }

        let settings = self.ice_loader.load().await;
        *self.ice_settings.write().await = Some(settings.clone());
        settings
    }

    async fn create_link(
        &self,
        transport_id: &str,
        role: NegotiationRole,
    ) -> Result<Arc<crate::peer::PeerLink>> {
        let settings = self.ensure_ice_settings().await;
        let audio = self.media.audio_track().await.map(|t| t.rtp_track());
        let video = self.media.video_track().await.map(|t| t.rtp_track());

        self.registry
            .create(
                transport_id,
                role,
                settings.to_rtc_configuration(),
                audio,
                video,
            )
            .await
    }

    async fn drop_peer(&self, transport_id: &str) {
        if let Err(e) = self.registry.remove(transport_id).await {
            warn!(peer = %transport_id, error = %e, "Error closing link");
        }
        let mut session = self.session.write().await;
        if let Some(active) = session.as_mut() {
            active.link_states.remove(transport_id);
            active.remote_tracks.remove(transport_id);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.session_events_tx.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}
