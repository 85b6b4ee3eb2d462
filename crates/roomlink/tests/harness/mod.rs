//! Room Flow Test Harness
//!
//! Infrastructure for integration testing the coordinator against live
//! sockets:
//! - In-process signaling relay on a random port, speaking the real wire
//!   protocol (roster snapshots, join/leave announcements, signal routing)
//! - Scripted raw relay clients for wire-level assertions
//! - Canned HTTP endpoints for the ICE configuration fetch
//! - Event stream wait helpers
//!
//! Basic usage pattern:
//!
//! 1. Spawn a `StubRelay` and point coordinators at `relay.url()`
//! 2. Join rooms and drive the relay (`disconnect_user`, `send_to_user`)
//! 3. Assert on session events with `next_session_event`
//! 4. Call `relay.shutdown()` to clean up

pub mod raw_client;
pub mod relay;

use std::time::Duration;

use roomlink::SessionEvent;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::debug;

pub use raw_client::RawClient;
pub use relay::StubRelay;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Relay error: {0}")]
    RelayError(String),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Read session events until one matches `predicate`, or time out
///
/// Non-matching events are consumed and discarded, which keeps tests
/// independent of incidental event ordering.
pub async fn next_session_event<F>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
    mut predicate: F,
) -> HarnessResult<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(HarnessError::Timeout("matching session event".to_string()));
        }

        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .map_err(|_| HarnessError::Timeout("matching session event".to_string()))?
            .ok_or_else(|| HarnessError::ClientError("event stream closed".to_string()))?;

        debug!(event = ?event, "Harness observed session event");
        if predicate(&event) {
            return Ok(event);
        }
    }
}

/// Spawn a minimal HTTP endpoint returning the same canned response for
/// every request
///
/// Returns the endpoint URL. The listener runs until the test process ends.
pub async fn spawn_http_stub(status_line: &'static str, body: &'static str) -> HarnessResult<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };

            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;

                let response = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok(format!("http://{}/api/config/ice-servers", addr))
}
