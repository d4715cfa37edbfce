//! Server configuration.

use std::{path::PathBuf, time::Duration};

/// Identifier of the room that always exists.
pub const DEFAULT_LOBBY_ID: &str = "lobby";

/// Grace window before an empty room is deleted.
pub const DEFAULT_ROOM_DELETION_DELAY: Duration = Duration::from_secs(30);

/// Largest inbound text frame accepted from a client, in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 2048;

/// Frames queued per connection before it is treated as stale.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// WebSocket close code for policy violations (RFC 6455).
pub const CLOSE_POLICY: u16 = 1008;

/// WebSocket close code for messages that are too large (RFC 6455).
pub const CLOSE_TOO_LARGE: u16 = 1009;

/// What a deferred deletion does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    /// Delete the room regardless of its occupancy at fire time.
    #[default]
    Unconditional,
    /// Keep the room if it has been repopulated since the timer was scheduled.
    RecheckOccupancy,
}

/// Room manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub lobby_id: String,
    pub deletion_delay: Duration,
    pub deletion_policy: DeletionPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            lobby_id: DEFAULT_LOBBY_ID.to_string(),
            deletion_delay: DEFAULT_ROOM_DELETION_DELAY,
            deletion_policy: DeletionPolicy::default(),
        }
    }
}

/// HTTP and WebSocket surface settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub max_message_bytes: usize,
    pub outbound_queue_capacity: usize,
    /// Origins allowed by CORS. Empty disables the layer, `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Directory served under `/view`, if any.
    pub view_dir: Option<PathBuf>,
    /// `max-age` of the `Cache-Control` header on `/view`. Zero sends no header.
    pub static_cache: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            allowed_origins: Vec::new(),
            view_dir: None,
            static_cache: Duration::ZERO,
        }
    }
}

/// Complete server settings, built from the command line in the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12345,
            gateway: GatewayConfig::default(),
            room: RoomConfig::default(),
        }
    }
}
