//! Stream lifecycle notifications
//!
//! Best-effort POSTs to an external tracking endpoint when the local
//! stream starts and stops. Delivery retries a few times with backoff and
//! then gives up; nothing in the session depends on these landing.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Payload POSTed to the lifecycle endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// `stream-started` or `stream-stopped`
    pub event: String,

    /// Room the stream belongs to
    pub room_id: String,

    /// User owning the stream
    pub user_id: String,

    /// Active capture source at event time (`camera`, `screen`, `inactive`)
    pub stream_type: String,

    /// ISO 8601 timestamp when the event occurred
    pub timestamp: String,
}

impl LifecycleEvent {
    /// Build a stream-started event stamped now
    pub fn started(room_id: &str, user_id: &str, stream_type: &str) -> Self {
        Self::stamped("stream-started", room_id, user_id, stream_type)
    }

    /// Build a stream-stopped event stamped now
    pub fn stopped(room_id: &str, user_id: &str, stream_type: &str) -> Self {
        Self::stamped("stream-stopped", room_id, user_id, stream_type)
    }

    fn stamped(event: &str, room_id: &str, user_id: &str, stream_type: &str) -> Self {
        Self {
            event: event.to_string(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            stream_type: stream_type.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Fire-and-forget sender for lifecycle events
///
/// With no endpoint configured every notification is a no-op.
pub struct StreamLifecycleNotifier {
    client: Client,
    endpoint: Option<String>,
}

impl StreamLifecycleNotifier {
    /// Create a notifier targeting `endpoint` (None disables delivery)
    pub fn new(endpoint: Option<String>, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, endpoint }
    }

    /// Whether an endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Announce that the local stream started
    pub fn notify_started(&self, room_id: &str, user_id: &str, stream_type: &str) {
        self.dispatch(LifecycleEvent::started(room_id, user_id, stream_type));
    }

    /// Announce that the local stream stopped
    pub fn notify_stopped(&self, room_id: &str, user_id: &str, stream_type: &str) {
        self.dispatch(LifecycleEvent::stopped(room_id, user_id, stream_type));
    }

    fn dispatch(&self, event: LifecycleEvent) {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => return,
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            deliver(&client, &endpoint, &event).await;
        });
    }
}

/// Deliver one event with bounded retries; true on a 2xx response
async fn deliver(client: &Client, endpoint: &str, event: &LifecycleEvent) -> bool {
    let mut attempts = 0;

    while attempts < MAX_ATTEMPTS {
        attempts += 1;

        match client.post(endpoint).json(event).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    debug!(
                        url = %endpoint,
                        event = %event.event,
                        status,
                        attempts,
                        "Lifecycle event delivered"
                    );
                    return true;
                }
                if !is_retryable_status(status) {
                    warn!(
                        url = %endpoint,
                        event = %event.event,
                        status,
                        "Lifecycle endpoint rejected event"
                    );
                    return false;
                }
                warn!(
                    url = %endpoint,
                    event = %event.event,
                    status,
                    attempt = attempts,
                    "Lifecycle delivery got retryable status"
                );
            }
            Err(e) => {
                warn!(
                    url = %endpoint,
                    event = %event.event,
                    attempt = attempts,
                    error = %e,
                    "Lifecycle delivery attempt failed"
                );
            }
        }

        if attempts < MAX_ATTEMPTS {
            sleep(Duration::from_millis(calculate_backoff(attempts))).await;
        }
    }

    warn!(
        url = %endpoint,
        event = %event.event,
        attempts,
        "Lifecycle event dropped after retries"
    );
    false
}

/// Exponential backoff with +/-25% jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let exponential = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);

    let jitter_range = exponential / 4;
    let jitter = if jitter_range > 0 {
        (rand_jitter() % jitter_range as u32) as u64
    } else {
        0
    };

    let with_jitter = if rand_jitter() % 2 == 0 {
        exponential.saturating_add(jitter)
    } else {
        exponential.saturating_sub(jitter)
    };

    with_jitter.min(MAX_BACKOFF_MS)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Simple jitter function using system time as entropy
fn rand_jitter() -> u32 {
    use std::time::SystemTime;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    (now.subsec_nanos() ^ now.as_secs() as u32) % 1000
}
