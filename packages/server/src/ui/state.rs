//! Server state shared by all handlers.

use crate::usecase::RoomManager;

/// Shared application state
pub struct AppState {
    /// RoomManager（ルームのライフサイクルとブロードキャスト）
    pub room_manager: RoomManager,
    /// Largest inbound text frame accepted from a client, in bytes
    pub max_message_bytes: usize,
    /// Frames queued per connection before it is treated as stale
    pub outbound_queue_capacity: usize,
}
