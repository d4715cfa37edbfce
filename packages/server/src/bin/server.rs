//! Multi-room WebSocket broadcast server.
//!
//! Clients join a room (or the lobby) and receive status, user-list and
//! message broadcasts; lobby clients also receive the live room directory.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin heya-server
//! cargo run --bin heya-server -- --host 0.0.0.0 --port 12345 --room-deletion-delay-secs 10
//! cargo run --bin heya-server -- --view-dir ./view --static-cache-secs 3600 \
//!     --allow-origin http://192.168.0.10:8000
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use heya_server::{
    config::{
        DEFAULT_LOBBY_ID, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        DEFAULT_ROOM_DELETION_DELAY, DeletionPolicy, GatewayConfig, RoomConfig, ServerConfig,
    },
    ui::Server,
    usecase::RoomManager,
};
use heya_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "heya-server")]
#[command(about = "Multi-room WebSocket broadcast server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "12345")]
    port: u16,

    /// Identifier of the always-present lobby room
    #[arg(long, default_value = DEFAULT_LOBBY_ID)]
    lobby_id: String,

    /// Seconds an empty room is kept before it is deleted
    #[arg(long, default_value_t = DEFAULT_ROOM_DELETION_DELAY.as_secs())]
    room_deletion_delay_secs: u64,

    /// Largest text message accepted from a client, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,

    /// Frames queued for a client before it is dropped as unresponsive
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    outbound_queue_capacity: usize,

    /// Keep rooms that were repopulated before their deletion timer fired
    #[arg(long)]
    keep_occupied_rooms: bool,

    /// Origin allowed to call the server from a browser (repeatable, `*` for any)
    #[arg(long = "allow-origin")]
    allowed_origins: Vec<String>,

    /// Directory with the web client, served under /view
    #[arg(long)]
    view_dir: Option<PathBuf>,

    /// Cache-Control max-age for files under /view, in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    static_cache_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            gateway: GatewayConfig {
                max_message_bytes: args.max_message_bytes,
                outbound_queue_capacity: args.outbound_queue_capacity,
                allowed_origins: args.allowed_origins,
                view_dir: args.view_dir,
                static_cache: Duration::from_secs(args.static_cache_secs),
            },
            room: RoomConfig {
                lobby_id: args.lobby_id,
                deletion_delay: Duration::from_secs(args.room_deletion_delay_secs),
                deletion_policy: if args.keep_occupied_rooms {
                    DeletionPolicy::RecheckOccupancy
                } else {
                    DeletionPolicy::Unconditional
                },
            },
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_PKG_NAME"), env!("CARGO_BIN_NAME"), "debug");

    let config = ServerConfig::from(Args::parse());
    tracing::debug!("Starting with {:?}", config);

    // 1. Create RoomManager (in-memory rooms, lobby only)
    let room_manager = RoomManager::new(config.room.clone());
    tracing::info!("Lobby '{}' ready", room_manager.lobby_id());

    // 2. Create and run the server
    let server = Server::new(room_manager, config.gateway);
    if let Err(e) = server.run(config.host, config.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
