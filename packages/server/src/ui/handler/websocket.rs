//! WebSocket connection handlers.
//!
//! `GET /ws?username=<name>&room=<id>&create=<bool>`
//!
//! A missing or empty `room` joins the lobby. With `create=true` the room is
//! created first and the request fails if it cannot be.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    config::{CLOSE_POLICY, CLOSE_TOO_LARGE},
    domain::{Connection, ErrorCode, Username},
    infrastructure::{
        connection::{Outbound, WebSocketConnection},
        dto::websocket::{ChatMessage, ErrorMessage, encode},
    },
    ui::state::AppState,
    usecase::RoomManager,
};
use heya_shared::time::now_utc_millis;

/// How long queued frames may take to flush once the client stops reading.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub create: bool,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

/// Decide which room the connection joins.
///
/// Returns the error code to report when the request cannot be honoured.
async fn resolve_room(
    manager: &RoomManager,
    room: Option<String>,
    create: bool,
) -> Result<String, ErrorCode> {
    let room = room.unwrap_or_default();

    if create {
        if let Some(code) = manager.create_error(&room).await {
            return Err(code);
        }
        // Another client may have created it since the check
        if !manager.create(&room).await {
            return Err(ErrorCode::RoomExists);
        }
        manager.broadcast_rooms().await;
        return Ok(room);
    }

    if room.is_empty() || manager.is_lobby(&room) {
        return Ok(manager.lobby_id().to_string());
    }
    if !manager.exists(&room).await {
        return Err(ErrorCode::BadRoom);
    }
    Ok(room)
}

/// Report an error to a connection that never joined, then close it.
async fn reject(mut socket: WebSocket, code: ErrorCode, close_code: u16) {
    match encode(&ErrorMessage::new(code)) {
        Ok(json) => {
            if let Err(e) = socket.send(Message::Text(json.into())).await {
                tracing::debug!("Failed to send '{}' error: {}", code, e);
            }
        }
        Err(e) => tracing::warn!("Failed to encode error message: {}", e),
    }

    let frame = CloseFrame {
        code: close_code,
        reason: Utf8Bytes::from_static(code.as_str()),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Failed to send close frame: {}", e);
    }
}

/// Spawns a task that drains the outbound queue into the WebSocket sink.
///
/// The task ends after a close frame, or when a write fails. Dropping the
/// receiver makes every later send on the connection fail, which is how the
/// room manager detects the connection as stale.
fn pusher_loop(
    mut rx: mpsc::Receiver<Outbound>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    let frame = reason.map(|r| CloseFrame {
                        code: r.code,
                        reason: r.reason.into(),
                    });
                    if let Err(e) = sender.send(Message::Close(frame)).await {
                        tracing::debug!("Failed to send close frame: {}", e);
                    }
                    break;
                }
            }
        }
    })
}

/// Reads client frames and relays chat text to the room.
async fn receive_loop(
    mut receiver: SplitStream<WebSocket>,
    state: Arc<AppState>,
    connection: Arc<WebSocketConnection>,
    room_id: String,
    username: Username,
) {
    let manager = &state.room_manager;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("WebSocket error from '{}': {}", username.as_str(), e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let text = text.as_str();
                if text.len() > state.max_message_bytes {
                    tracing::warn!(
                        "Message from '{}' too large ({} bytes), closing",
                        username.as_str(),
                        text.len()
                    );
                    match encode(&ErrorMessage::new(ErrorCode::MsgTooLarge)) {
                        Ok(json) => {
                            RoomManager::safe_send_text(connection.as_ref(), &json).await;
                        }
                        Err(e) => tracing::warn!("Failed to encode error message: {}", e),
                    }
                    if let Err(e) =
                        connection.close_with(CLOSE_TOO_LARGE, ErrorCode::MsgTooLarge.as_str())
                    {
                        tracing::debug!("Failed to close '{}': {}", username.as_str(), e);
                    }
                    break;
                }

                let chat = ChatMessage::new(
                    username.as_str().to_string(),
                    text.to_string(),
                    now_utc_millis(),
                );
                match encode(&chat) {
                    Ok(json) => manager.broadcast_room(&room_id, &json, None).await,
                    Err(e) => tracing::warn!("Failed to encode chat message: {}", e),
                }
            }
            Message::Close(_) => {
                tracing::info!("Client '{}' requested close", username.as_str());
                break;
            }
            _ => {}
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: ConnectQuery) {
    let manager = state.room_manager.clone();

    let username = match Username::try_from(query.username) {
        Ok(username) => username,
        Err(e) => {
            tracing::warn!("Rejecting connection: {}", e);
            reject(socket, e.code(), CLOSE_POLICY).await;
            return;
        }
    };

    let room_id = match resolve_room(&manager, query.room, query.create).await {
        Ok(room_id) => room_id,
        Err(code) => {
            tracing::warn!(
                "Rejecting '{}' with '{}'",
                username.as_str(),
                code.as_str()
            );
            reject(socket, code, CLOSE_POLICY).await;
            return;
        }
    };

    let (sender, receiver) = socket.split();
    let (connection, rx) = WebSocketConnection::with_capacity(state.outbound_queue_capacity);
    let connection = Arc::new(connection);
    let connection_id = connection.id();
    let mut send_task = pusher_loop(rx, sender);

    // Join: register the connection in the room's registry
    let room = manager.ensure_room(&room_id).await;
    room.insert(connection.clone(), username.as_str().to_string())
        .await;
    tracing::info!(
        "'{}' joined room '{}' as connection '{}'",
        username.as_str(),
        room_id,
        connection_id
    );

    let is_lobby = manager.is_lobby(&room_id);
    if is_lobby {
        manager.subscribe_lobby(connection.clone()).await;
        match manager.rooms_payload().await {
            Ok(json) => {
                RoomManager::safe_send_text(connection.as_ref(), &json).await;
            }
            Err(e) => tracing::warn!("Failed to encode rooms payload: {}", e),
        }
    }
    manager
        .announce_status(
            &room_id,
            &format!("{} joined", username.as_str()),
            Some(connection_id),
        )
        .await;
    manager.announce_users(&room_id).await;
    if !is_lobby {
        manager.broadcast_rooms().await;
    }

    let mut recv_task = tokio::spawn(receive_loop(
        receiver,
        state.clone(),
        connection.clone(),
        room_id.clone(),
        username.clone(),
    ));

    // If any one of the tasks completes, stop the other
    tokio::select! {
        _ = &mut recv_task => {
            // Flush whatever is still queued (error, close frame) before giving up
            if let Err(e) = connection.close().await {
                tracing::trace!("Close after receive loop: {}", e);
            }
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
        _ = &mut send_task => recv_task.abort(),
    };

    manager.unsubscribe_lobby(&connection_id).await;
    manager
        .user_left(&room_id, &connection_id, username.as_str())
        .await;
    tracing::info!("'{}' left room '{}'", username.as_str(), room_id);
}
