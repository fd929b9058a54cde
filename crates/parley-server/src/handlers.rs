//! HTTP and WebSocket handlers for Parley server.
//!
//! This module turns requests into the two things the hub understands:
//! creating a named room, and attaching an upgraded connection to a room.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_core::{attach, ClientConfig, Room, RoomError, RoomInfo, RoomRegistry, DEFAULT_ROOM_ID};
use parley_transport::WebSocketConnection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// All rooms, by name.
    pub registry: RoomRegistry,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create the registry and start the default room.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured default room name is invalid.
    pub fn new(config: Config) -> Result<Arc<Self>, RoomError> {
        let registry = RoomRegistry::with_config(config.room_config(), &config.rooms.default_room);
        registry.spawn_room(DEFAULT_ROOM_ID, &config.rooms.default_room)?;
        metrics::set_active_rooms(registry.len());

        Ok(Arc::new(Self { registry, config }))
    }
}

/// Errors returned to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A room operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Neither the requested room nor the default room exists.
    #[error("No room available")]
    NoRoom,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Room(RoomError::DuplicateRoomName(_)) => StatusCode::CONFLICT,
            ApiError::Room(RoomError::InvalidRoomName(_)) => StatusCode::BAD_REQUEST,
            ApiError::Room(RoomError::RoomClosed(_)) | ApiError::NoRoom => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/rooms", post(create_room_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the router on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server stopped")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the config is invalid or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let websocket_path = config.transport.websocket_path.clone();
    let state = AppState::new(config).context("Failed to create default room")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, websocket_path);

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.registry.len(),
    }))
}

/// Query for room creation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateRoomParams {
    /// Name of the room to create.
    pub roomname: String,
}

/// Create a room and start its event loop.
async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateRoomParams>,
) -> Result<Json<RoomInfo>, ApiError> {
    let id = state.registry.next_room_id();
    let room = state.registry.spawn_room(id, &params.roomname)?;
    metrics::set_active_rooms(state.registry.len());

    Ok(Json(room.info()))
}

/// Query for joining a room.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JoinParams {
    /// Room to join; unknown names fall back to the default room.
    pub roomname: String,
    /// Display name shown to other members.
    pub name: Option<String>,
}

/// Pick the display name for a joining client.
fn display_name(requested: Option<String>, fallback: &str) -> String {
    requested
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(params): Query<JoinParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(room) = state.registry.resolve(&params.roomname) else {
        return ApiError::NoRoom.into_response();
    };

    let name = display_name(params.name, &state.config.rooms.default_display_name);
    let config = state.config.client_config();

    debug!(room = %room.name(), requested = %params.roomname, name = %name, "Upgrade request");

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote, room, name, config))
}

/// Attach an upgraded connection and hold it until both pumps finish.
async fn handle_websocket(
    socket: WebSocket,
    remote: SocketAddr,
    room: Room,
    name: String,
    config: ClientConfig,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection = WebSocketConnection::new(socket).with_remote_addr(remote.to_string());

    match attach(Box::new(connection), &room, name, &config).await {
        Ok(tasks) => {
            let id = tasks.id();
            tasks.wait().await;
            debug!(room = %room.name(), client = id, "WebSocket disconnected");
        }
        Err(e) => warn!(room = %room.name(), error = %e, "Failed to attach connection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back() {
        assert_eq!(display_name(None, "hello world"), "hello world");
        assert_eq!(display_name(Some(String::new()), "hello world"), "hello world");
        assert_eq!(display_name(Some("Ann".to_string()), "hello world"), "Ann");
    }

    #[test]
    fn test_api_error_status() {
        let conflict = ApiError::from(RoomError::DuplicateRoomName("a".into())).into_response();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let invalid = ApiError::from(RoomError::InvalidRoomName("empty")).into_response();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        assert_eq!(
            ApiError::NoRoom.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_state_starts_default_room() {
        let state = AppState::new(Config::default()).unwrap();
        let room = state.registry.resolve("anything").unwrap();
        assert_eq!(room.name(), "first");
        assert_eq!(room.id(), DEFAULT_ROOM_ID);
        assert!(!room.is_closed());
    }
}
