//! WebSocket signaling channel
//!
//! Owns the relay connection end to end: `connect()` performs the initial
//! handshake, then a supervisor loop drives the socket and reconnects with
//! exponential backoff when the transport drops. Inbound frames are parsed
//! into [`SignalingEvent`]s for the coordinator; outbound [`ClientMessage`]s
//! are queued on an internal channel and flushed whenever the transport is
//! up, so signals produced during an outage are delivered after reconnect
//! rather than lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::protocol::{
    ClientMessage, JoinRoomParams, Participant, ServerMessage, SignalKind, SignalParams,
};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::events::SignalingEvent;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Reconnect backoff policy for the signaling transport
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum reconnection attempts before giving up
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds
    pub backoff_initial_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub backoff_max_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff
    pub jitter_enabled: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 1000,
            backoff_max_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl BackoffPolicy {
    /// Build the policy from the coordinator's reconnect settings
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_retries: config.max_reconnect_retries,
            backoff_initial_ms: config.reconnect_backoff_initial_ms,
            backoff_max_ms: config.reconnect_backoff_max_ms,
            backoff_multiplier: config.reconnect_backoff_multiplier,
            jitter_enabled: true,
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// Uses exponential backoff with optional jitter.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);

        // Clamp to maximum
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        // Add jitter (0-25% of backoff)
        let final_ms = if self.jitter_enabled {
            let jitter = rand_jitter(backoff_ms * 0.25);
            backoff_ms + jitter
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Simple pseudo-random jitter using time-based seed
fn rand_jitter(max: f64) -> f64 {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as f64;
    (seed % 1000.0) / 1000.0 * max
}

/// WebSocket channel to the signaling relay
///
/// The channel never calls back into the rest of the coordinator: every
/// inbound frame becomes a [`SignalingEvent`] on the stream handed to
/// [`SignalingChannel::new`]. A lost transport emits
/// [`SignalingEvent::Disconnected`] and triggers reconnection; established
/// peer links are untouched by a transport blip.
pub struct SignalingChannel {
    /// Signaling relay URL
    url: String,

    /// Reconnect policy
    policy: BackoffPolicy,

    /// Connect handshake timeout
    connect_timeout: Duration,

    /// Outbound queue feeding the connection loop
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,

    /// Taken exactly once by `run()`
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientMessage>>>,

    /// Coordinator-facing event stream
    events_tx: mpsc::UnboundedSender<SignalingEvent>,

    /// Socket staged by `connect()` for `run()` to drive
    initial: Mutex<Option<WsStream>>,

    /// Whether the transport is currently up
    connected: AtomicBool,

    /// Local shutdown request
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SignalingChannel {
    /// Create a channel for the relay named by `config.signaling_url`
    ///
    /// # Arguments
    ///
    /// * `config` - Coordinator configuration (URL, reconnect policy, timeouts)
    /// * `events_tx` - Sink for events parsed from relay frames
    pub fn new(
        config: &CoordinatorConfig,
        events_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            url: config.signaling_url.clone(),
            policy: BackoffPolicy::from_config(config),
            connect_timeout: Duration::from_secs(config.request_timeout_secs),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            events_tx,
            initial: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Perform the initial transport handshake
    ///
    /// Resolves once the WebSocket is open, staging the socket for `run()`
    /// to drive; errors on handshake failure so the caller decides whether
    /// to retry. Reconnecting after a mid-session drop is `run()`'s job,
    /// not this method's.
    pub async fn connect(&self) -> Result<()> {
        let ws_stream = self.handshake().await?;
        *self.initial.lock().await = Some(ws_stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Supervisor loop: drive the socket, reconnect with backoff
    ///
    /// Picks up the socket staged by `connect()`, dialing itself when none
    /// is staged. Runs until `close()` is called or reconnect attempts are
    /// exhausted. Intended to be spawned once; a second call logs and
    /// returns.
    pub async fn run(&self) {
        let mut outbound_rx = match self.outbound_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("Signaling channel is already running");
                return;
            }
        };

        let mut staged = self.initial.lock().await.take();
        let mut attempt: u32 = 0;
        loop {
            if self.is_closed() {
                break;
            }

            let handshake = match staged.take() {
                Some(ws_stream) => Ok(ws_stream),
                None => self.handshake().await,
            };

            match handshake {
                Ok(ws_stream) => {
                    attempt = 0;
                    self.connected.store(true, Ordering::SeqCst);
                    info!(url = %self.url, "Signaling transport connected");
                    self.emit(SignalingEvent::Connected);

                    let reason = self.drive(ws_stream, &mut outbound_rx).await;
                    self.connected.store(false, Ordering::SeqCst);

                    if self.is_closed() {
                        debug!("Signaling transport closed locally");
                        break;
                    }

                    warn!(reason = %reason, "Signaling transport lost");
                    self.emit(SignalingEvent::Disconnected { reason });
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "Signaling connect failed");
                }
            }

            if !self.policy.should_retry(attempt) {
                error!(attempts = attempt, "Signaling reconnect attempts exhausted");
                self.emit(SignalingEvent::Disconnected {
                    reason: "reconnect attempts exhausted".to_string(),
                });
                break;
            }

            let backoff = self.policy.calculate_backoff(attempt);
            attempt += 1;
            info!(
                attempt = attempt,
                max_retries = self.policy.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                "Waiting before signaling reconnect"
            );

            let mut shutdown_rx = self.shutdown_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        debug!("Signaling channel task terminated");
    }

    /// Open the WebSocket with a bounded handshake
    async fn handshake(&self) -> Result<WsStream> {
        debug!(url = %self.url, "Connecting to signaling relay");

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| Error::OperationTimeout(format!("connect to {}", self.url)))?
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        Ok(ws_stream)
    }

    /// Pump one live connection until it drops; returns the loss reason
    async fn drive(
        &self,
        ws_stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    ) -> String {
        let (mut write, mut read) = ws_stream.split();
        let mut shutdown_rx = self.shutdown_rx.clone();

        if self.is_closed() {
            return "closed locally".to_string();
        }

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            let json = match message.to_json() {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Dropping unserializable outbound message");
                                    continue;
                                }
                            };

                            debug!(
                                message_type = message.message_type(),
                                "Sending signaling frame"
                            );

                            if let Err(e) = write.send(Message::Text(json)).await {
                                return format!("send failed: {}", e);
                            }
                        }
                        None => return "outbound queue closed".to_string(),
                    }
                }
                inbound = read.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Close(_))) => return "closed by relay".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return format!("transport error: {}", e),
                        None => return "stream ended".to_string(),
                    }
                }
                _ = shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return "closed locally".to_string();
                }
            }
        }
    }

    /// Parse one inbound frame and publish the corresponding event
    ///
    /// Unknown and malformed frames are logged and discarded; a bad frame
    /// never takes the connection down.
    fn handle_frame(&self, text: &str) {
        let message = match ServerMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding unparseable signaling frame");
                return;
            }
        };

        debug!(
            message_type = message.message_type(),
            "Received signaling frame"
        );

        match message {
            ServerMessage::ExistingParticipants(roster) => {
                self.emit(SignalingEvent::Roster(roster));
            }
            ServerMessage::UserJoined(params) => {
                self.emit(SignalingEvent::ParticipantJoined(Participant::joined_now(
                    &params.user_id,
                    &params.transport_id,
                )));
            }
            ServerMessage::UserLeft(params) => {
                self.emit(SignalingEvent::ParticipantLeft {
                    transport_id: params.transport_id,
                });
            }
            ServerMessage::WebrtcSignal(params) => {
                self.emit(SignalingEvent::Signal {
                    from: params.from,
                    kind: params.kind,
                    payload: params.signal,
                });
            }
            ServerMessage::RoomError(params) => {
                self.emit(SignalingEvent::RoomError {
                    message: params.error,
                    code: params.code,
                });
            }
        }
    }

    fn emit(&self, event: SignalingEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Signaling event receiver dropped");
        }
    }

    /// Announce presence in a room
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room to join
    /// * `user_id` - Local user identity
    pub fn join_room(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.send_message(ClientMessage::JoinRoom(JoinRoomParams {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        }))
    }

    /// Relay a negotiation signal to one peer
    ///
    /// # Arguments
    ///
    /// * `target_transport_id` - Transport the relay should deliver to
    /// * `kind` - Signal kind
    /// * `payload` - SDP description or candidate init as JSON
    pub fn send_signal(
        &self,
        target_transport_id: &str,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.send_message(ClientMessage::WebrtcSignal(SignalParams {
            signal: payload,
            target_transport_id: target_transport_id.to_string(),
            kind,
        }))
    }

    /// Queue a message for delivery
    ///
    /// Messages queued while the transport is down are flushed on reconnect.
    fn send_message(&self, message: ClientMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SignalingError(
                "Signaling channel is closed".to_string(),
            ));
        }

        self.outbound_tx
            .send(message)
            .map_err(|e| Error::SignalingError(format!("Failed to queue message: {}", e)))
    }

    /// Whether the transport is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether `close()` has been requested
    pub fn is_closed(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Request shutdown: the supervisor sends a close frame and exits
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
