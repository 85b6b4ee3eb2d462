//! In-process signaling relay
//!
//! Implements the relay side of the wire protocol for tests: assigns a fresh
//! transport id per `join-room`, answers with the room roster, announces
//! joins and departures, and routes `webrtc-signal` frames by target
//! transport with the sender's id stamped into `from`. Knows nothing about
//! SDP; payloads pass through opaque, exactly like the production relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomlink::signaling::protocol::{
    ClientMessage, IncomingSignalParams, Participant, ServerMessage, UserJoinedParams,
    UserLeftParams,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{HarnessError, HarnessResult};

/// One connected relay client
struct RelayClient {
    user_id: String,
    room_id: String,
    outbound: mpsc::UnboundedSender<String>,
    kill: mpsc::UnboundedSender<()>,
}

/// Relay state shared across connection tasks, keyed by transport id
#[derive(Default)]
struct RelayState {
    next_transport: u32,
    clients: HashMap<String, RelayClient>,
}

/// Signaling relay on a random local port
pub struct StubRelay {
    addr: SocketAddr,
    state: Arc<Mutex<RelayState>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl StubRelay {
    /// Bind and start accepting connections
    pub async fn spawn() -> HarnessResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(RelayState::default()));

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Relay accepted connection");
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, state).await {
                                debug!(error = %e, "Relay connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Relay accept failed");
                        break;
                    }
                }
            }
        });

        info!(addr = %addr, "Stub relay listening");
        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    /// WebSocket URL coordinators should connect to
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Transport id currently assigned to a user, if connected
    pub async fn transport_id_of(&self, user_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .clients
            .iter()
            .find(|(_, client)| client.user_id == user_id)
            .map(|(transport_id, _)| transport_id.clone())
    }

    /// Number of currently registered clients
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    /// Poll until `count` clients have joined
    pub async fn wait_for_clients(&self, count: usize, timeout: Duration) -> HarnessResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.client_count().await >= count {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Err(HarnessError::Timeout(format!("{} relay clients", count)))
    }

    /// Inject a frame toward one user's connection
    pub async fn send_to_user(&self, user_id: &str, frame: &ServerMessage) -> HarnessResult<()> {
        let json = frame
            .to_json()
            .map_err(|e| HarnessError::RelayError(e.to_string()))?;

        let state = self.state.lock().await;
        let client = state
            .clients
            .values()
            .find(|client| client.user_id == user_id)
            .ok_or_else(|| HarnessError::RelayError(format!("No client for user {}", user_id)))?;

        client
            .outbound
            .send(json)
            .map_err(|e| HarnessError::RelayError(e.to_string()))
    }

    /// Kill one user's connection; the departure is announced to the room as
    /// it would be for a real socket loss
    pub async fn disconnect_user(&self, user_id: &str) -> HarnessResult<()> {
        let state = self.state.lock().await;
        let client = state
            .clients
            .values()
            .find(|client| client.user_id == user_id)
            .ok_or_else(|| HarnessError::RelayError(format!("No client for user {}", user_id)))?;

        let _ = client.kill.send(());
        Ok(())
    }

    /// Stop accepting and drop every connection without departure
    /// announcements, simulating a relay outage
    pub async fn shutdown(&self) {
        self.accept_task.abort();

        let drained: Vec<RelayClient> = {
            let mut state = self.state.lock().await;
            state.clients.drain().map(|(_, client)| client).collect()
        };
        for client in drained {
            let _ = client.kill.send(());
        }

        info!("Stub relay stopped");
    }
}

/// Drive one client connection until it drops
async fn serve_connection(stream: TcpStream, state: Arc<Mutex<RelayState>>) -> HarnessResult<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| HarnessError::RelayError(format!("Handshake failed: {}", e)))?;
    let (mut write, mut read) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();
    let mut transport_id: Option<String> = None;

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&text, &state, &outbound_tx, &kill_tx, &mut transport_id)
                        .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = kill_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    deregister(&state, transport_id).await;
    Ok(())
}

/// Handle one frame from a client
async fn handle_client_frame(
    text: &str,
    state: &Arc<Mutex<RelayState>>,
    outbound_tx: &mpsc::UnboundedSender<String>,
    kill_tx: &mpsc::UnboundedSender<()>,
    transport_id: &mut Option<String>,
) {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Relay discarding unparseable frame");
            return;
        }
    };

    match message {
        ClientMessage::JoinRoom(params) => {
            if transport_id.is_some() {
                debug!(user = %params.user_id, "Relay ignoring repeat join on same connection");
                return;
            }

            let mut state = state.lock().await;
            state.next_transport += 1;
            let assigned = format!("t{}", state.next_transport);

            // Roster snapshot for the joiner: everyone already in the room
            let roster: Vec<Participant> = state
                .clients
                .iter()
                .filter(|(_, client)| client.room_id == params.room_id)
                .map(|(id, client)| Participant::joined_now(&client.user_id, id))
                .collect();
            if let Ok(json) = ServerMessage::ExistingParticipants(roster).to_json() {
                let _ = outbound_tx.send(json);
            }

            // Announce the newcomer to the room
            let joined = ServerMessage::UserJoined(UserJoinedParams {
                user_id: params.user_id.clone(),
                transport_id: assigned.clone(),
            });
            if let Ok(json) = joined.to_json() {
                for client in state
                    .clients
                    .values()
                    .filter(|client| client.room_id == params.room_id)
                {
                    let _ = client.outbound.send(json.clone());
                }
            }

            info!(
                user = %params.user_id,
                transport = %assigned,
                room = %params.room_id,
                "Relay client joined"
            );
            state.clients.insert(
                assigned.clone(),
                RelayClient {
                    user_id: params.user_id,
                    room_id: params.room_id,
                    outbound: outbound_tx.clone(),
                    kill: kill_tx.clone(),
                },
            );
            *transport_id = Some(assigned);
        }
        ClientMessage::WebrtcSignal(params) => {
            let from = match transport_id {
                Some(transport_id) => transport_id.clone(),
                None => {
                    warn!("Relay dropping signal from unjoined connection");
                    return;
                }
            };

            let state = state.lock().await;
            match state.clients.get(&params.target_transport_id) {
                Some(target) => {
                    let frame = ServerMessage::WebrtcSignal(IncomingSignalParams {
                        signal: params.signal,
                        from,
                        kind: params.kind,
                    });
                    if let Ok(json) = frame.to_json() {
                        let _ = target.outbound.send(json);
                    }
                }
                None => debug!(
                    target = %params.target_transport_id,
                    "Relay dropping signal for unknown transport"
                ),
            }
        }
    }
}

/// Remove a departed client and announce `user-left` to its room
async fn deregister(state: &Arc<Mutex<RelayState>>, transport_id: Option<String>) {
    let transport_id = match transport_id {
        Some(transport_id) => transport_id,
        None => return,
    };

    let mut state = state.lock().await;
    if let Some(departed) = state.clients.remove(&transport_id) {
        info!(user = %departed.user_id, transport = %transport_id, "Relay client departed");

        let left = ServerMessage::UserLeft(UserLeftParams { transport_id });
        if let Ok(json) = left.to_json() {
            for client in state
                .clients
                .values()
                .filter(|client| client.room_id == departed.room_id)
            {
                let _ = client.outbound.send(json.clone());
            }
        }
    }
}
