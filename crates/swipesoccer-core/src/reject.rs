use serde::{Deserialize, Serialize};

/// Why a move or lifecycle request was refused. Every variant is recoverable:
/// the game is left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    NotYourTurn,
    /// No such edge, edge already claimed, or a slide along a touchline.
    IllegalMove,
    GameFull,
    GameNotFound,
    /// Another request held the game for longer than the lock timeout.
    GameBusy,
    GameAlreadyStarted,
    GameNotStarted,
    /// The game has reached a terminal outcome.
    GameOver,
    /// The requesting connection went away while waiting.
    Disconnected,
}

impl RejectReason {
    /// Transient rejections may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::GameBusy)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NotYourTurn => "not your turn",
            Self::IllegalMove => "illegal move",
            Self::GameFull => "game is full",
            Self::GameNotFound => "game not found",
            Self::GameBusy => "game is busy, try again",
            Self::GameAlreadyStarted => "game already started",
            Self::GameNotStarted => "game has not started",
            Self::GameOver => "game is over",
            Self::Disconnected => "connection closed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for RejectReason {}
