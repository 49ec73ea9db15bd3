use std::time::Duration;

use serde::Deserialize;

use swipesoccer_core::board::{BoardError, BoardGeometry, STANDARD_COLS, STANDARD_ROWS};
use swipesoccer_core::game::DEFAULT_MAX_PLAYERS;

const CONFIG_FILE: &str = "swipesoccer.toml";

/// Top-level server configuration, loaded from `swipesoccer.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub game: GameConfig,
    pub limits: LimitsConfig,
    pub lifecycle: LifecycleConfig,
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: "web".to_string(),
            game: GameConfig::default(),
            limits: LimitsConfig::default(),
            lifecycle: LifecycleConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Board shape and match rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub rows: usize,
    pub cols: usize,
    /// Roster size at which a waiting game starts.
    pub max_players: usize,
    /// How long an operation waits for a game's lock before giving up with
    /// `GameBusy`.
    pub lock_timeout_ms: u64,
    /// Join attempts against existing games before a new one is created.
    pub matchmaking_attempts: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rows: STANDARD_ROWS,
            cols: STANDARD_COLS,
            max_players: DEFAULT_MAX_PLAYERS,
            lock_timeout_ms: 2000,
            matchmaking_attempts: 3,
        }
    }
}

impl GameConfig {
    pub fn geometry(&self) -> Result<BoardGeometry, BoardError> {
        BoardGeometry::new(self.rows, self.cols)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    pub presence_event_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            ws_rate_limit_per_sec: 20.0,
            player_message_buffer: 64,
            presence_event_capacity: 1024,
        }
    }
}

/// Game lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            idle_check_interval_secs: 60,
        }
    }
}

/// Where games are persisted. No path keeps them in memory only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidListenAddr(String),
    InvalidBoard(BoardError),
    MustBePositive(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidListenAddr(addr) => {
                write!(f, "listen_addr {addr:?} is not a valid socket address")
            },
            Self::InvalidBoard(e) => write!(f, "invalid board: {e}"),
            Self::MustBePositive(field) => write!(f, "{field} must be > 0"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Check the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        self.game.geometry().map_err(ConfigError::InvalidBoard)?;
        if self.game.max_players < 2 {
            tracing::warn!(
                max_players = self.game.max_players,
                "game.max_players below 2, games will start with two players"
            );
        }
        if self.game.lock_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive("game.lock_timeout_ms"));
        }
        if self.game.matchmaking_attempts == 0 {
            return Err(ConfigError::MustBePositive("game.matchmaking_attempts"));
        }

        if self.limits.max_ws_connections == 0 {
            return Err(ConfigError::MustBePositive("limits.max_ws_connections"));
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err(ConfigError::MustBePositive("limits.ws_rate_limit_per_sec"));
        }
        if self.limits.player_message_buffer == 0 {
            return Err(ConfigError::MustBePositive("limits.player_message_buffer"));
        }
        if self.limits.presence_event_capacity == 0 {
            return Err(ConfigError::MustBePositive(
                "limits.presence_event_capacity",
            ));
        }

        if self.lifecycle.idle_timeout_secs == 0 {
            return Err(ConfigError::MustBePositive("lifecycle.idle_timeout_secs"));
        }
        if self.lifecycle.idle_check_interval_secs == 0 {
            return Err(ConfigError::MustBePositive(
                "lifecycle.idle_check_interval_secs",
            ));
        }
        Ok(())
    }

    /// Load config from `swipesoccer.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {CONFIG_FILE}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {CONFIG_FILE}: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No {CONFIG_FILE} found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SWIPESOCCER_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(root) = std::env::var("SWIPESOCCER_WEB_ROOT")
            && !root.is_empty()
        {
            self.web_root = root;
        }
        if let Ok(path) = std::env::var("SWIPESOCCER_STORAGE_PATH")
            && !path.is_empty()
        {
            self.storage.path = Some(path);
        }
        if let Ok(val) = std::env::var("SWIPESOCCER_MAX_PLAYERS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.game.max_players = n;
        }

        // Limits overrides
        if let Ok(val) = std::env::var("SWIPESOCCER_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("SWIPESOCCER_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
    }
}
