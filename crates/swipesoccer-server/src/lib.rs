pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod presence;
pub mod service;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use config::ServerConfig;
use presence::PresenceEvent;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let state = AppState::new(config);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .fallback_service(ServeDir::new(&web_root))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Background task that turns `PlayerDisconnected` events into channel
/// cleanup and inactivity purges.
pub fn spawn_presence_listener(state: AppState) {
    // Subscribe before spawning so no disconnect is missed.
    let mut rx = state.service.presence().subscribe();
    state
        .presence_listener_running
        .store(true, Ordering::Release);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PresenceEvent::PlayerDisconnected {
                    player_id,
                    connection,
                    game_id: Some(game_id),
                }) => {
                    let directory = state.service.directory();
                    directory.leave_channel(game_id, player_id, connection).await;
                    if state.service.purge_if_inactive(game_id).await {
                        tracing::debug!(game_id = %game_id, "Last player left, game purged");
                    }
                },
                Ok(PresenceEvent::PlayerDisconnected { game_id: None, .. }) => {},
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Presence listener lagged by {n} events");
                },
                Err(RecvError::Closed) => {
                    tracing::info!("Presence channel closed, stopping listener");
                    break;
                },
            }
        }
        state
            .presence_listener_running
            .store(false, Ordering::Release);
    });
}

/// Background task that removes games nobody has touched within the idle
/// timeout.
pub fn spawn_idle_sweeper(state: AppState) {
    let interval = Duration::from_secs(state.config.lifecycle.idle_check_interval_secs);
    let max_idle = Duration::from_secs(state.config.lifecycle.idle_timeout_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state
                .service
                .directory()
                .cleanup_idle_games(max_idle, state.service.presence())
                .await;
            if removed > 0 {
                tracing::info!(removed, "Idle games removed");
            }
        }
    });
}
