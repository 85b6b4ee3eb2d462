//! Room client binary entry point
//!
//! Joins a room through a signaling relay and logs session events until
//! interrupted. Useful for exercising a relay deployment and watching the
//! mesh come up from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Join a room on a local relay
//! cargo run --bin room_client -- \
//!   --signaling-url ws://localhost:8080/ws \
//!   --room standup \
//!   --user alice
//!
//! # Fetch ICE configuration from an endpoint, cap the mesh
//! cargo run --bin room_client -- \
//!   --ice-config-url https://relay.example.com/api/ice \
//!   --max-peers 4
//!
//! # Join receive-only (simulates capture denial)
//! cargo run --bin room_client -- --deny-media
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use roomlink::{ChannelCaptureDevice, CoordinatorConfig, RoomCoordinator, SessionEvent};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Roomlink demo client
///
/// Joins a peer-to-peer room and prints the session event stream.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling relay URL
    #[arg(
        long,
        default_value = "ws://localhost:8080/ws",
        env = "ROOMLINK_SIGNALING_URL"
    )]
    signaling_url: String,

    /// Room to join
    #[arg(long, default_value = "lobby", env = "ROOMLINK_ROOM")]
    room: String,

    /// Local user identity (random when omitted)
    #[arg(long, env = "ROOMLINK_USER")]
    user: Option<String>,

    /// HTTP endpoint serving ICE configuration
    #[arg(long, env = "ROOMLINK_ICE_CONFIG_URL")]
    ice_config_url: Option<String>,

    /// HTTP endpoint receiving stream lifecycle events
    #[arg(long, env = "ROOMLINK_LIFECYCLE_URL")]
    lifecycle_url: Option<String>,

    /// Maximum concurrent peer links
    #[arg(long, default_value_t = 10, env = "ROOMLINK_MAX_PEERS")]
    max_peers: u32,

    /// Grace window for disconnected links in milliseconds
    #[arg(long, default_value_t = 5000, env = "ROOMLINK_DISCONNECT_GRACE_MS")]
    disconnect_grace_ms: u64,

    /// Maximum signaling reconnect attempts
    #[arg(long, default_value_t = 5, env = "ROOMLINK_MAX_RECONNECT_RETRIES")]
    max_reconnect_retries: u32,

    /// Join without local capture (receive-only session)
    #[arg(long, default_value_t = false, env = "ROOMLINK_DENY_MEDIA")]
    deny_media: bool,
}

fn build_config(args: &Args) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(&args.signaling_url);
    config.ice_config_url = args.ice_config_url.clone();
    config.lifecycle_url = args.lifecycle_url.clone();
    config.max_peers = args.max_peers;
    config.disconnect_grace_ms = args.disconnect_grace_ms;
    config.max_reconnect_retries = args.max_reconnect_retries;
    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        // Watchdog so a wedged teardown cannot hang the terminal
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("roomlink-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let user_id = args
        .user
        .clone()
        .unwrap_or_else(|| format!("user-{}", &uuid::Uuid::new_v4().to_string()[..8]));

    info!(
        version = roomlink::version(),
        signaling_url = %args.signaling_url,
        room = %args.room,
        user = %user_id,
        max_peers = args.max_peers,
        disconnect_grace_ms = args.disconnect_grace_ms,
        deny_media = args.deny_media,
        "Roomlink client starting"
    );

    let device = Arc::new(ChannelCaptureDevice::new());
    if args.deny_media {
        device.deny_access(true);
    }

    let config = build_config(&args);
    let coordinator = Arc::new(RoomCoordinator::new(config, device)?);

    let mut events = coordinator
        .take_event_receiver()
        .await
        .expect("event receiver already taken");

    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run().await });
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    coordinator.join_room(&args.room, &user_id).await?;
    info!("Joined. Press Ctrl+C to leave.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, leaving room...");
    if let Err(e) = coordinator.leave_room().await {
        warn!(error = %e, "Error leaving room");
    }
    coordinator.close();
    info!("Room client shut down gracefully");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::RoomJoined { room_id } => info!(room = %room_id, "Room joined"),
        SessionEvent::RoomLeft { room_id } => info!(room = %room_id, "Room left"),
        SessionEvent::ParticipantAdded(p) => {
            info!(user = %p.user_id, peer = %p.transport_id, "Participant added")
        }
        SessionEvent::ParticipantRemoved { transport_id } => {
            info!(peer = %transport_id, "Participant removed")
        }
        SessionEvent::PeerStateChanged {
            transport_id,
            state,
        } => info!(peer = %transport_id, state = %state, "Peer state changed"),
        SessionEvent::RemoteTrackAdded { transport_id, .. } => {
            info!(peer = %transport_id, "Remote track added")
        }
        SessionEvent::LocalMediaChanged { source } => {
            info!(source = %source, "Local media changed")
        }
        SessionEvent::SignalingConnectivityChanged { connected } => {
            info!(connected = connected, "Signaling connectivity changed")
        }
        SessionEvent::RoomError { message, code } => {
            warn!(message = %message, code = ?code, "Room error")
        }
    }
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
