use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    pub games: GameInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    /// Players currently bound to a connection.
    pub players_online: usize,
    /// Identities seen since startup.
    pub players_known: usize,
}

#[derive(Serialize)]
pub struct GameInfo {
    pub active: usize,
    pub seated_players: usize,
}

/// Server status, connection counts and game counts as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);
    let (known, online) = state.service.presence().stats().await;
    let (active, seated) = state.service.directory().stats().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo {
            websocket: ws,
            players_online: online,
            players_known: known,
        },
        games: GameInfo {
            active,
            seated_players: seated,
        },
    })
}

/// Ready once disconnects are being turned into game cleanup.
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, AppError> {
    if !state.presence_listener_running.load(Ordering::Acquire) {
        return Err(AppError::ServiceUnavailable(
            "presence listener not running".to_string(),
        ));
    }
    Ok("ready")
}
