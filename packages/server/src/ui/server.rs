//! Server execution logic.

use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Response, header},
    routing::get,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::{config::GatewayConfig, usecase::RoomManager};

use super::{
    handler::{get_rooms, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// WebSocket chat server
///
/// # Example
///
/// ```ignore
/// let room_manager = RoomManager::new(RoomConfig::default());
/// let server = Server::new(room_manager, GatewayConfig::default());
/// server.run("127.0.0.1".to_string(), 12345).await?;
/// ```
pub struct Server {
    /// RoomManager（ルームのライフサイクルとブロードキャスト）
    room_manager: RoomManager,
    /// Message limits, CORS and static file settings
    gateway: GatewayConfig,
}

impl Server {
    /// Create a new Server instance
    ///
    /// # Arguments
    ///
    /// * `room_manager` - Owner of all rooms, shared with every connection
    /// * `gateway` - Message limits, CORS origins and the `/view` directory
    pub fn new(room_manager: RoomManager, gateway: GatewayConfig) -> Self {
        Self {
            room_manager,
            gateway,
        }
    }

    /// Build the router with all endpoints
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState {
            room_manager: self.room_manager.clone(),
            max_message_bytes: self.gateway.max_message_bytes,
            outbound_queue_capacity: self.gateway.outbound_queue_capacity,
        });

        let mut app = Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/rooms", get(get_rooms))
            .with_state(app_state);

        // 静的ファイル（Web クライアント）
        if let Some(dir) = &self.gateway.view_dir {
            app = app.nest_service("/view", view_router(dir, self.gateway.static_cache));
        }
        if let Some(cors) = cors_layer(&self.gateway.allowed_origins) {
            app = app.layer(cors);
        }

        app.layer(TraceLayer::new_for_http())
    }

    /// Run the WebSocket chat server
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 12345)
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.router();

        // Bind the server to the host and port
        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        // Start the server
        tracing::info!(
            "WebSocket chat server listening on {}",
            listener.local_addr()?
        );
        tracing::info!(
            "Connect to: ws://{}/ws?username=<name>&room=<room>",
            bind_addr
        );
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        // Set up graceful shutdown signal handler
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");

        Ok(())
    }
}

/// Serve `dir`, adding `Cache-Control` to successful responses when `cache` is non-zero
fn view_router(dir: &Path, cache: Duration) -> Router {
    let router = Router::new().fallback_service(ServeDir::new(dir));
    if cache.is_zero() {
        return router;
    }

    let value = HeaderValue::from_str(&format!("public, max-age={}", cache.as_secs()));
    match value {
        Ok(value) => router.layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            move |response: &Response<Body>| {
                (response.status().as_u16() < 400).then(|| value.clone())
            },
        )),
        Err(e) => {
            tracing::warn!("Invalid Cache-Control value, serving without it: {}", e);
            router
        }
    }
}

/// Build the CORS layer for the configured origins
///
/// Returns `None` when no origin is configured. `*` allows any origin without
/// credentials; an explicit list allows credentials and mirrors the requested
/// methods and headers.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    if origins.iter().any(|origin| origin == "*") {
        return Some(CorsLayer::permissive());
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request()),
    )
}
