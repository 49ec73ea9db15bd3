use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::{Board, Vertex};
use crate::player::{PlayerId, PlayerInfo};
use crate::reject::RejectReason;
use crate::state::GameState;
use crate::turn::{self, Kick};

/// Opaque identifier of a match.
pub type GameId = Uuid;

/// Roster size used when nothing else is configured.
pub const DEFAULT_MAX_PLAYERS: usize = 2;

/// Lifecycle phase, derived from the game's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// Waiting for the roster to fill.
    Waiting,
    InProgress,
    /// A terminal outcome was reached; no further moves are accepted.
    Finished,
}

/// A match: roster plus the board state once it has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub host: PlayerId,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub created_at_ms: u64,
    state: Option<GameState>,
}

impl Game {
    /// New waiting game with `host` as its only member.
    pub fn new(id: GameId, host: PlayerInfo, max_players: usize) -> Self {
        Self {
            id,
            host: host.id,
            players: vec![host],
            max_players: max_players.max(2),
            created_at_ms: crate::time::unix_millis(),
            state: None,
        }
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn phase(&self) -> GamePhase {
        match &self.state {
            None => GamePhase::Waiting,
            Some(s) if s.is_finished() => GamePhase::Finished,
            Some(_) => GamePhase::InProgress,
        }
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == player)
    }

    pub fn has_free_seat(&self) -> bool {
        self.players.len() < self.max_players
    }

    /// Waiting for players and not yet full.
    pub fn is_joinable(&self) -> bool {
        self.phase() == GamePhase::Waiting && self.has_free_seat()
    }

    /// Add a player to the roster. Returns `Ok(false)` if they were already a
    /// member.
    pub fn join(&mut self, player: PlayerInfo) -> Result<bool, RejectReason> {
        if self.is_member(player.id) {
            return Ok(false);
        }
        if self.state.is_some() {
            return Err(RejectReason::GameAlreadyStarted);
        }
        if !self.has_free_seat() {
            return Err(RejectReason::GameFull);
        }
        self.players.push(player);
        Ok(true)
    }

    pub fn can_start(&self) -> bool {
        self.state.is_none() && self.players.len() >= self.max_players
    }

    /// Initialise the board once the roster is full. Returns whether this call
    /// started the game; a game is started at most once.
    pub fn start(&mut self, board: &Board) -> bool {
        if !self.can_start() {
            return false;
        }
        self.state = Some(turn::initial_state(board, self.players.clone()));
        true
    }

    /// Apply a kick by `player` and replace the state with the result.
    pub fn apply_move(&mut self, player: PlayerId, target: Vertex) -> Result<Kick, RejectReason> {
        let state = self.state.as_ref().ok_or(RejectReason::GameNotStarted)?;
        let index = state
            .player_index(player)
            .ok_or(RejectReason::NotYourTurn)?;
        let result = turn::apply_move(state, index, target)?;
        self.state = Some(result.state);
        Ok(result.kick)
    }

    /// Keep the display name of a member in sync after they re-register.
    pub fn rename_player(&mut self, player: PlayerId, name: &str) {
        let state_roster = self.state.iter_mut().flat_map(|s| s.players.iter_mut());
        for p in self
            .players
            .iter_mut()
            .chain(state_roster)
            .filter(|p| p.id == player)
        {
            p.name = name.to_string();
        }
    }
}
