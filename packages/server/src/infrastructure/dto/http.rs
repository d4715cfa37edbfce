//! HTTP API のレスポンス DTO

use serde::{Deserialize, Serialize};

/// `GET /api/health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthDto {
    pub status: String,
    /// サーバー時刻（RFC 3339, UTC）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,
}

/// `GET /api/rooms`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomListDto {
    pub lobby: String,
    pub rooms: Vec<String>,
}
