//! Configuration types for the room session coordinator
//!
//! `CoordinatorConfig` holds locally supplied knobs (endpoints, timers,
//! reconnect policy). `IceSettings` is the server-provided ICE blob fetched
//! by `IceConfigLoader`, which falls back to a built-in STUN configuration
//! whenever the fetch fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Main configuration for the RoomCoordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// HTTP endpoint serving ICE configuration (None = use fallback directly)
    pub ice_config_url: Option<String>,

    /// HTTP endpoint receiving stream lifecycle events (None = disabled)
    pub lifecycle_url: Option<String>,

    /// Maximum peers in mesh (default: 10, range 1-50)
    pub max_peers: u32,

    /// Grace window for the `disconnected` state in milliseconds (default: 5000)
    pub disconnect_grace_ms: u64,

    /// Delay before an initiator link generates its first offer, giving local
    /// tracks time to attach (default: 150)
    pub initiator_offer_delay_ms: u64,

    /// Fixed delay between buffered ICE-candidate retry sweeps (default: 500)
    pub candidate_retry_delay_ms: u64,

    /// Buffered candidate retry attempts before the candidate is dropped
    /// (default: 10)
    pub candidate_retry_max: u32,

    /// HTTP request timeout in seconds for config fetch and lifecycle events
    /// (default: 10)
    pub request_timeout_secs: u64,

    /// Maximum signaling transport reconnect attempts (default: 5)
    pub max_reconnect_retries: u32,

    /// Initial signaling reconnect backoff in milliseconds (default: 1000)
    pub reconnect_backoff_initial_ms: u64,

    /// Maximum signaling reconnect backoff in milliseconds (default: 30000)
    pub reconnect_backoff_max_ms: u64,

    /// Signaling reconnect backoff multiplier (default: 2.0)
    pub reconnect_backoff_multiplier: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".to_string(),
            ice_config_url: None,
            lifecycle_url: None,
            max_peers: 10,
            disconnect_grace_ms: 5000,
            initiator_offer_delay_ms: 150,
            candidate_retry_delay_ms: 500,
            candidate_retry_max: 10,
            request_timeout_secs: 10,
            max_reconnect_retries: 5,
            reconnect_backoff_initial_ms: 1000,
            reconnect_backoff_max_ms: 30000,
            reconnect_backoff_multiplier: 2.0,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration pointing at the given signaling relay
    pub fn new(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `ice_config_url` / `lifecycle_url` are present but not http(s)
    /// - `max_peers` is not in range 1-50
    /// - `disconnect_grace_ms` is zero
    /// - `reconnect_backoff_multiplier` is below 1.0
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        // Both HTTP endpoints are optional but must be well-formed when given
        for (name, endpoint) in [
            ("ice_config_url", &self.ice_config_url),
            ("lifecycle_url", &self.lifecycle_url),
        ] {
            if let Some(endpoint) = endpoint {
                let parsed = url::Url::parse(endpoint)
                    .map_err(|e| Error::InvalidConfig(format!("{} is invalid: {}", name, e)))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(Error::InvalidConfig(format!(
                        "{} must be http or https, got {}",
                        name, endpoint
                    )));
                }
            }
        }

        if self.max_peers == 0 || self.max_peers > 50 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-50, got {}",
                self.max_peers
            )));
        }

        if self.disconnect_grace_ms == 0 {
            return Err(Error::InvalidConfig(
                "disconnect_grace_ms must be non-zero".to_string(),
            ));
        }

        if self.reconnect_backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect_backoff_multiplier must be >= 1.0, got {}",
                self.reconnect_backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Set the ICE configuration endpoint
    ///
    /// Useful for chaining with `new()`.
    pub fn with_ice_config_url(mut self, url: &str) -> Self {
        self.ice_config_url = Some(url.to_string());
        self
    }

    /// Set the stream lifecycle tracking endpoint
    pub fn with_lifecycle_url(mut self, url: &str) -> Self {
        self.lifecycle_url = Some(url.to_string());
        self
    }

    /// Set the maximum number of peers
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set the `disconnected` grace window
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Grace window as a `Duration`
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Initiator offer delay as a `Duration`
    pub fn initiator_offer_delay(&self) -> Duration {
        Duration::from_millis(self.initiator_offer_delay_ms)
    }

    /// Candidate retry delay as a `Duration`
    pub fn candidate_retry_delay(&self) -> Duration {
        Duration::from_millis(self.candidate_retry_delay_ms)
    }
}

/// ICE server URLs: the config endpoint serves either a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    /// Single URL form: `"urls": "stun:..."`
    One(String),
    /// List form: `"urls": ["stun:...", "turn:..."]`
    Many(Vec<String>),
}

impl IceUrls {
    /// Flatten to a plain URL list
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }
}

/// One ICE server entry from the configuration endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerSettings {
    /// STUN/TURN URL(s)
    pub urls: IceUrls,

    /// TURN username (STUN entries omit it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerSettings {
    /// A credential-less STUN entry
    pub fn stun(url: &str) -> Self {
        Self {
            urls: IceUrls::One(url.to_string()),
            username: None,
            credential: None,
        }
    }
}

/// ICE configuration as served by the well-known endpoint
///
/// Policy fields arrive as the wire strings the endpoint serves
/// (`"all"`, `"relay"`, `"balanced"`, `"max-compat"`, `"max-bundle"`,
/// `"negotiate"`, `"require"`); unknown values map to the permissive
/// default when converted for the peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceSettings {
    /// STUN/TURN server list
    #[serde(default)]
    pub ice_servers: Vec<IceServerSettings>,

    /// ICE transport policy: `all` or `relay`
    #[serde(default = "default_ice_transport_policy")]
    pub ice_transport_policy: String,

    /// Bundle policy: `balanced`, `max-compat` or `max-bundle`
    #[serde(default = "default_bundle_policy")]
    pub bundle_policy: String,

    /// RTCP mux policy: `negotiate` or `require`
    #[serde(default = "default_rtcp_mux_policy")]
    pub rtcp_mux_policy: String,
}

fn default_ice_transport_policy() -> String {
    "all".to_string()
}

fn default_bundle_policy() -> String {
    "balanced".to_string()
}

fn default_rtcp_mux_policy() -> String {
    "require".to_string()
}

impl IceSettings {
    /// Built-in fallback used whenever the configuration fetch fails:
    /// two public STUN servers with permissive policies.
    pub fn fallback() -> Self {
        Self {
            ice_servers: vec![
                IceServerSettings::stun("stun:stun.l.google.com:19302"),
                IceServerSettings::stun("stun:stun1.l.google.com:19302"),
            ],
            ice_transport_policy: default_ice_transport_policy(),
            bundle_policy: default_bundle_policy(),
            rtcp_mux_policy: default_rtcp_mux_policy(),
        }
    }

    /// Convert to the webrtc-rs peer connection configuration
    pub fn to_rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.to_vec(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ice_transport_policy: match self.ice_transport_policy.as_str() {
                "relay" => RTCIceTransportPolicy::Relay,
                _ => RTCIceTransportPolicy::All,
            },
            bundle_policy: match self.bundle_policy.as_str() {
                "max-compat" => RTCBundlePolicy::MaxCompat,
                "max-bundle" => RTCBundlePolicy::MaxBundle,
                _ => RTCBundlePolicy::Balanced,
            },
            rtcp_mux_policy: match self.rtcp_mux_policy.as_str() {
                "negotiate" => RTCRtcpMuxPolicy::Negotiate,
                _ => RTCRtcpMuxPolicy::Require,
            },
            ..Default::default()
        }
    }
}

impl Default for IceSettings {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Fetches ICE settings from the well-known endpoint
///
/// `load()` never fails: any fetch problem (no endpoint configured, network
/// error, non-success status, malformed body, empty server list) substitutes
/// `IceSettings::fallback()` so the coordinator can always attempt
/// connections. A readiness flag flips once either path completes; nothing
/// creates a peer link before that.
pub struct IceConfigLoader {
    endpoint: Option<String>,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl IceConfigLoader {
    /// Create a loader for the given endpoint (None = fallback only)
    pub fn new(endpoint: Option<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint,
            client,
            ready: AtomicBool::new(false),
        }
    }

    /// Whether a load has completed (either path)
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Fetch ICE settings, substituting the fallback on any failure
    pub async fn load(&self) -> IceSettings {
        let settings = match &self.endpoint {
            Some(endpoint) => match self.try_fetch(endpoint).await {
                Ok(settings) if settings.ice_servers.is_empty() => {
                    // An empty server list cannot satisfy connectivity;
                    // treat it the same as a fetch failure
                    warn!(
                        endpoint = %endpoint,
                        "ICE config endpoint returned no servers, using fallback"
                    );
                    IceSettings::fallback()
                }
                Ok(settings) => {
                    info!(
                        endpoint = %endpoint,
                        servers = settings.ice_servers.len(),
                        "Loaded ICE configuration"
                    );
                    settings
                }
                Err(e) => {
                    warn!(
                        endpoint = %endpoint,
                        error = %e,
                        "ICE config fetch failed, using fallback"
                    );
                    IceSettings::fallback()
                }
            },
            None => {
                debug!("No ICE config endpoint configured, using fallback");
                IceSettings::fallback()
            }
        };

        self.ready.store(true, Ordering::Release);
        settings
    }

    async fn try_fetch(&self, endpoint: &str) -> crate::Result<IceSettings> {
        use crate::Error;

        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| Error::SignalingError(format!("ICE config request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SignalingError(format!(
                "ICE config endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json::<IceSettings>()
            .await
            .map_err(|e| Error::SerializationError(format!("Invalid ICE config body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let config = CoordinatorConfig::new("http://localhost:8080");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_max_peers_fails() {
        let mut config = CoordinatorConfig::default();
        config.max_peers = 0;
        assert!(config.validate().is_err());

        config.max_peers = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ice_config_url_fails() {
        let config = CoordinatorConfig::new("ws://localhost:8080/ws")
            .with_ice_config_url("ftp://example.com/ice");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_grace_window_fails() {
        let mut config = CoordinatorConfig::default();
        config.disconnect_grace_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = CoordinatorConfig::new("wss://relay.example.com/ws")
            .with_ice_config_url("https://relay.example.com/ice")
            .with_lifecycle_url("https://relay.example.com/streams")
            .with_max_peers(4)
            .with_disconnect_grace(Duration::from_secs(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.disconnect_grace_ms, 2000);
    }

    #[test]
    fn test_config_serialization() {
        let config = CoordinatorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: CoordinatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.signaling_url, deserialized.signaling_url);
        assert_eq!(config.max_peers, deserialized.max_peers);
    }

    #[test]
    fn test_fallback_settings() {
        let settings = IceSettings::fallback();
        assert_eq!(settings.ice_servers.len(), 2);
        assert_eq!(settings.ice_transport_policy, "all");
        assert_eq!(settings.bundle_policy, "balanced");
        assert_eq!(settings.rtcp_mux_policy, "require");
    }

    #[test]
    fn test_ice_urls_single_string() {
        let json = r#"{"iceServers":[{"urls":"stun:stun.example.com:3478"}]}"#;
        let settings: IceSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.ice_servers.len(), 1);
        assert_eq!(
            settings.ice_servers[0].urls.to_vec(),
            vec!["stun:stun.example.com:3478".to_string()]
        );
        // Omitted policies take the permissive defaults
        assert_eq!(settings.ice_transport_policy, "all");
    }

    #[test]
    fn test_ice_urls_list() {
        let json = r#"{
            "iceServers": [
                {"urls": ["turn:turn.example.com:3478", "turns:turn.example.com:5349"],
                 "username": "user", "credential": "pass"}
            ],
            "iceTransportPolicy": "relay",
            "bundlePolicy": "max-bundle",
            "rtcpMuxPolicy": "negotiate"
        }"#;
        let settings: IceSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.ice_servers[0].urls.to_vec().len(), 2);
        assert_eq!(settings.ice_servers[0].username.as_deref(), Some("user"));
        assert_eq!(settings.ice_transport_policy, "relay");
    }

    #[test]
    fn test_to_rtc_configuration_policies() {
        let mut settings = IceSettings::fallback();
        settings.ice_transport_policy = "relay".to_string();
        settings.bundle_policy = "max-bundle".to_string();
        settings.rtcp_mux_policy = "negotiate".to_string();

        let rtc = settings.to_rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::Relay);
        assert_eq!(rtc.bundle_policy, RTCBundlePolicy::MaxBundle);
        assert_eq!(rtc.rtcp_mux_policy, RTCRtcpMuxPolicy::Negotiate);
    }

    #[test]
    fn test_unknown_policy_maps_to_permissive() {
        let mut settings = IceSettings::fallback();
        settings.ice_transport_policy = "bogus".to_string();
        settings.bundle_policy = "bogus".to_string();
        settings.rtcp_mux_policy = "bogus".to_string();

        let rtc = settings.to_rtc_configuration();
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::All);
        assert_eq!(rtc.bundle_policy, RTCBundlePolicy::Balanced);
        assert_eq!(rtc.rtcp_mux_policy, RTCRtcpMuxPolicy::Require);
    }

    #[tokio::test]
    async fn test_loader_without_endpoint_uses_fallback() {
        let loader = IceConfigLoader::new(None, Duration::from_secs(1));
        assert!(!loader.is_ready());

        let settings = loader.load().await;
        assert!(loader.is_ready());
        assert_eq!(settings.ice_servers.len(), 2);
        assert_eq!(settings.ice_transport_policy, "all");
    }

    #[tokio::test]
    async fn test_loader_unreachable_endpoint_uses_fallback() {
        // Port 9 (discard) is not listening in the test environment
        let loader = IceConfigLoader::new(
            Some("http://127.0.0.1:9/ice".to_string()),
            Duration::from_millis(500),
        );

        let settings = loader.load().await;
        assert!(loader.is_ready());
        assert_eq!(settings.ice_servers.len(), 2);
    }
}
