//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{
    infrastructure::dto::http::{HealthDto, RoomListDto},
    ui::state::AppState,
};
use heya_shared::time::{now_utc_millis, timestamp_to_rfc3339};

/// Health check endpoint
pub async fn health_check() -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_string(),
        server_time: timestamp_to_rfc3339(now_utc_millis()),
    })
}

/// Get the room directory (lobby excluded)
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<RoomListDto> {
    let manager = &state.room_manager;
    Json(RoomListDto {
        lobby: manager.lobby_id().to_string(),
        rooms: manager.list_rooms().await,
    })
}
