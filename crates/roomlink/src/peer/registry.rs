//! Arena of live peer links, keyed by transport id
//!
//! The registry is the only holder of `PeerLink`s. Links enter through
//! `create` (roster walk or lazy responder creation) and leave through
//! `remove`/`close_all`; both directions are idempotent so the coordinator
//! can process duplicate roster entries and repeated departures without
//! special cases.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::events::LinkEvent;
use crate::media::MediaKind;
use crate::peer::link::{LinkState, NegotiationRole, PeerLink};

/// Point-in-time view of one registry entry
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Transport the link points at
    pub transport_id: String,
    /// Which side drives negotiation
    pub role: NegotiationRole,
    /// Link state at snapshot time
    pub state: LinkState,
    /// How long the link has been connected, when it is
    pub connected_for: Option<Duration>,
}

/// Registry of peer links for one room session
pub struct PeerRegistry {
    config: CoordinatorConfig,
    links: Arc<RwLock<HashMap<String, Arc<PeerLink>>>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl PeerRegistry {
    /// Create an empty registry publishing link events to `events_tx`
    pub fn new(config: CoordinatorConfig, events_tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            config,
            links: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
        }
    }

    /// Create a link toward `transport_id`, or return the existing one
    ///
    /// Duplicate creation is not an error: roster snapshots and early
    /// signals can both race to create the same link, and the first one
    /// wins. The configured peer cap is enforced only for genuinely new
    /// links.
    pub async fn create(
        &self,
        transport_id: &str,
        role: NegotiationRole,
        rtc_config: RTCConfiguration,
        audio_track: Option<Arc<TrackLocalStaticSample>>,
        video_track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<Arc<PeerLink>> {
        let mut links = self.links.write().await;

        if let Some(existing) = links.get(transport_id) {
            debug!(peer = %transport_id, "Link already exists, reusing");
            return Ok(Arc::clone(existing));
        }

        if links.len() >= self.config.max_peers as usize {
            return Err(Error::InvalidState(format!(
                "Peer limit reached ({})",
                self.config.max_peers
            )));
        }

        let link = PeerLink::new(
            transport_id,
            role,
            rtc_config,
            &self.config,
            audio_track,
            video_track,
            self.events_tx.clone(),
        )
        .await?;

        links.insert(transport_id.to_string(), Arc::clone(&link));
        info!(
            peer = %transport_id,
            role = %role,
            total = links.len(),
            "Link registered"
        );
        Ok(link)
    }

    /// Look up a live link
    pub async fn get(&self, transport_id: &str) -> Option<Arc<PeerLink>> {
        self.links.read().await.get(transport_id).cloned()
    }

    /// Close and drop the link toward `transport_id`
    ///
    /// Removing an unknown transport is a no-op.
    pub async fn remove(&self, transport_id: &str) -> Result<()> {
        let link = self.links.write().await.remove(transport_id);
        match link {
            Some(link) => {
                debug!(peer = %transport_id, "Link removed from registry");
                link.close().await
            }
            None => {
                debug!(peer = %transport_id, "Remove for unknown transport, ignoring");
                Ok(())
            }
        }
    }

    /// Close and drop every link
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<PeerLink>)> =
            self.links.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "Closing all peer links");
        for (transport_id, link) in drained {
            if let Err(e) = link.close().await {
                warn!(peer = %transport_id, error = %e, "Error closing link");
            }
        }
    }

    /// Number of live links
    pub async fn count(&self) -> usize {
        self.links.read().await.len()
    }

    /// Whether a link toward `transport_id` exists
    pub async fn contains(&self, transport_id: &str) -> bool {
        self.links.read().await.contains_key(transport_id)
    }

    /// Transport ids of all live links
    pub async fn transport_ids(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }

    /// Snapshot every link's state for observability
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        let links: Vec<Arc<PeerLink>> = self.links.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(links.len());
        for link in links {
            infos.push(PeerInfo {
                transport_id: link.transport_id().to_string(),
                role: link.role(),
                state: link.state().await,
                connected_for: link.connection_duration().await,
            });
        }
        infos
    }

    /// Point every live link's outbound senders at the current local tracks
    ///
    /// Each kind is replaced where a sender exists and attached where none
    /// does; one failing link does not block the rest.
    pub async fn sync_outbound_tracks(
        &self,
        audio: Option<Arc<TrackLocalStaticSample>>,
        video: Option<Arc<TrackLocalStaticSample>>,
    ) {
        let links: Vec<Arc<PeerLink>> = self.links.read().await.values().cloned().collect();

        for link in links {
            if let Some(track) = &audio {
                if let Err(e) = link
                    .sync_outbound_track(MediaKind::Audio, Arc::clone(track))
                    .await
                {
                    warn!(peer = %link.transport_id(), error = %e, "Failed to update audio track");
                }
            }
            if let Some(track) = &video {
                if let Err(e) = link
                    .sync_outbound_track(MediaKind::Video, Arc::clone(track))
                    .await
                {
                    warn!(peer = %link.transport_id(), error = %e, "Failed to update video track");
                }
            }
        }
    }
}
