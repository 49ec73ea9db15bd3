use serde::{Deserialize, Serialize};

use crate::board::{Board, Vertex};
use crate::player::PlayerInfo;
use crate::reject::RejectReason;
use crate::rules::{self, ValidMove};
use crate::state::{GameState, Outcome};

/// Summary of an accepted kick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kick {
    pub player: usize,
    pub from: Vertex,
    pub to: Vertex,
    /// The kicker landed on an active vertex and moves again.
    pub extra_turn: bool,
    pub outcome: Option<Outcome>,
}

/// Result of [`apply_move`]: the successor state and what happened.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub state: GameState,
    pub kick: Kick,
}

/// Starting state for a match on `board` with the given roster. The first
/// player in the roster kicks off.
pub fn initial_state(board: &Board, players: Vec<PlayerInfo>) -> GameState {
    GameState::new(board, players)
}

/// Validate a kick and apply the turn rule.
///
/// Landing on a vertex that was already active (boundary lines, or any point
/// the ball has visited before) grants the kicker another move. Landing on a
/// fresh vertex passes the turn to the next player in roster order.
pub fn apply_move(
    state: &GameState,
    acting: usize,
    target: Vertex,
) -> Result<TurnResult, RejectReason> {
    let ValidMove {
        mut state,
        from,
        to,
        target_was_active,
    } = rules::validate(state, acting, target)?;

    if !target_was_active {
        state.player_in_turn = (state.player_in_turn + 1) % state.players.len().max(1);
    }

    let outcome = detect_outcome(&state, acting);
    state.outcome = outcome;

    if let Some(outcome) = outcome {
        tracing::debug!(?outcome, moves = state.move_count, "Game reached a terminal state");
    }

    Ok(TurnResult {
        state,
        kick: Kick {
            player: acting,
            from,
            to,
            extra_turn: target_was_active,
            outcome,
        },
    })
}

fn detect_outcome(state: &GameState, kicker: usize) -> Option<Outcome> {
    if let Some(goal) = state.geometry.goal_at(state.ball) {
        return Some(Outcome::Goal {
            goal,
            scored_by: kicker,
        });
    }
    if rules::legal_targets(state).is_empty() {
        return Some(Outcome::Blocked {
            stuck: state.player_in_turn,
        });
    }
    None
}
