use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use swipesoccer_core::board::{Board, BoardGeometry};

use crate::config::ServerConfig;
use crate::directory::SessionDirectory;
use crate::presence::PresenceTracker;
use crate::service::GameService;
use crate::store::{GameStore, JsonDirStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GameService>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    /// Set once the presence listener is consuming disconnect events.
    pub presence_listener_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let geometry = config.game.geometry().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Invalid board geometry, using the standard board");
            BoardGeometry::STANDARD
        });
        let store = open_store(&config);
        let directory = Arc::new(SessionDirectory::new(
            Board::generate(geometry),
            config.game.max_players,
            config.game.lock_timeout(),
            store,
        ));
        let presence = Arc::new(PresenceTracker::new(config.limits.presence_event_capacity));
        let service = Arc::new(GameService::new(
            presence,
            directory,
            config.game.matchmaking_attempts,
        ));

        Self {
            service,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            presence_listener_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn open_store(config: &ServerConfig) -> Arc<dyn GameStore> {
    let Some(path) = &config.storage.path else {
        return Arc::new(MemoryStore::new());
    };
    match JsonDirStore::open(path) {
        Ok(store) => {
            tracing::info!(path = %path, "Persisting games as JSON files");
            Arc::new(store)
        },
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Failed to open game storage, keeping games in memory");
            Arc::new(MemoryStore::new())
        },
    }
}

/// Counts a live WebSocket connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
