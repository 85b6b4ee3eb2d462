//! Scripted relay client
//!
//! A bare WebSocket participant for wire-level assertions: joins a room,
//! records every typed frame the relay delivers, and sends frames the test
//! composes. No peer connection behind it, so tests can observe exactly what
//! a coordinator on the other side of the relay emits.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomlink::signaling::protocol::{ClientMessage, JoinRoomParams, ServerMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{HarnessError, HarnessResult};

/// One scripted participant connection
pub struct RawClient {
    user_id: String,
    to_relay: mpsc::UnboundedSender<String>,
    frames: mpsc::UnboundedReceiver<ServerMessage>,
}

impl RawClient {
    /// Connect to the relay and announce presence in `room_id`
    pub async fn join(url: &str, room_id: &str, user_id: &str) -> HarnessResult<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| HarnessError::ClientError(format!("Connect failed: {}", e)))?;
        let (mut write, mut read) = ws.split();

        let (to_relay_tx, mut to_relay_rx) = mpsc::unbounded_channel::<String>();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = to_relay_rx.recv() => match out {
                        Some(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match ServerMessage::from_json(&text) {
                                Ok(message) => {
                                    if frames_tx.send(message).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => debug!(error = %e, "Raw client ignoring frame"),
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                }
            }
        });

        let client = Self {
            user_id: user_id.to_string(),
            to_relay: to_relay_tx,
            frames: frames_rx,
        };
        client.send(&ClientMessage::JoinRoom(JoinRoomParams {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        }))?;

        Ok(client)
    }

    /// User identity this client joined as
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Send one frame to the relay
    pub fn send(&self, message: &ClientMessage) -> HarnessResult<()> {
        let json = message
            .to_json()
            .map_err(|e| HarnessError::ClientError(e.to_string()))?;
        self.to_relay
            .send(json)
            .map_err(|e| HarnessError::ClientError(e.to_string()))
    }

    /// Next frame of any kind
    pub async fn next_frame(&mut self, timeout: Duration) -> HarnessResult<ServerMessage> {
        tokio::time::timeout(timeout, self.frames.recv())
            .await
            .map_err(|_| HarnessError::Timeout("relay frame".to_string()))?
            .ok_or_else(|| HarnessError::ClientError("connection closed".to_string()))
    }

    /// Skip frames until one matches `predicate`, or time out
    pub async fn frame_matching<F>(
        &mut self,
        timeout: Duration,
        mut predicate: F,
    ) -> HarnessResult<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::Timeout("matching relay frame".to_string()));
            }

            let frame = tokio::time::timeout(remaining, self.frames.recv())
                .await
                .map_err(|_| HarnessError::Timeout("matching relay frame".to_string()))?
                .ok_or_else(|| HarnessError::ClientError("connection closed".to_string()))?;

            debug!(frame = ?frame, "Raw client observed frame");
            if predicate(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Close the connection; the relay announces the departure
    pub fn close(self) {
        drop(self.to_relay);
    }
}
