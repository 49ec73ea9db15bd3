use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use swipesoccer_core::game::{Game, GameId};

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Encode(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Encode(e) => write!(f, "storage encoding error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e)
    }
}

/// Durable record of games. Each call is atomic on its own; callers
/// serialize writes to one game through the game's lock.
pub trait GameStore: Send + Sync {
    fn load(&self, id: GameId) -> Result<Option<Game>, StoreError>;
    fn save(&self, game: &Game) -> Result<(), StoreError>;
    fn delete(&self, id: GameId) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<Game>, StoreError>;

    /// Waiting games with a free seat, oldest first.
    fn list_joinable(&self) -> Result<Vec<Game>, StoreError> {
        let mut games: Vec<Game> = self
            .list()?
            .into_iter()
            .filter(Game::is_joinable)
            .collect();
        games.sort_by_key(|g| g.created_at_ms);
        Ok(games)
    }
}

/// Keeps games in a map; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<HashMap<GameId, Game>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GameStore for MemoryStore {
    fn load(&self, id: GameId) -> Result<Option<Game>, StoreError> {
        let games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(games.get(&id).cloned())
    }

    fn save(&self, game: &Game) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.insert(game.id, game.clone());
        Ok(())
    }

    fn delete(&self, id: GameId) -> Result<(), StoreError> {
        let mut games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        games.remove(&id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Game>, StoreError> {
        let games = self.games.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(games.values().cloned().collect())
    }
}

/// One pretty-printed `<game-id>.json` file per game under a directory.
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: GameId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl GameStore for JsonDirStore {
    fn load(&self, id: GameId) -> Result<Option<Game>, StoreError> {
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, game: &Game) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(game)?;
        // Write then rename so readers never see a half-written file.
        let tmp = self.dir.join(format!("{}.json.tmp", game.id));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.path_for(game.id))?;
        Ok(())
    }

    fn delete(&self, id: GameId) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Game>, StoreError> {
        let mut games = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<Game>(&bytes) {
                Ok(game) => games.push(game),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable game file");
                },
            }
        }
        Ok(games)
    }
}
