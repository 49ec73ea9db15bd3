use crate::board::{BoardGeometry, Vertex, VertexMark};
use crate::reject::RejectReason;
use crate::state::GameState;

/// A kick that passed every legality check, with the successor state.
#[derive(Debug, Clone)]
pub struct ValidMove {
    pub state: GameState,
    pub from: Vertex,
    pub to: Vertex,
    /// Whether `to` was already active before this kick.
    pub target_was_active: bool,
}

/// Check a kick from the ball's current vertex to `target` by the player at
/// `acting` and build the resulting state. The input state is left untouched.
///
/// The turn pointer is not moved here; that is the turn engine's job.
pub fn validate(
    state: &GameState,
    acting: usize,
    target: Vertex,
) -> Result<ValidMove, RejectReason> {
    if state.is_finished() {
        return Err(RejectReason::GameOver);
    }
    if acting != state.player_in_turn {
        return Err(RejectReason::NotYourTurn);
    }
    let edge = claimable_edge(state, target).ok_or(RejectReason::IllegalMove)?;

    let from = state.ball;
    let target_was_active = state.is_active(target);

    let mut next = state.clone();
    next.edges[edge].owner = Some(acting);
    next.ball = target;
    if next.vertices[target] == VertexMark::Inactive {
        next.vertices[target] = VertexMark::Active;
    }
    next.move_count += 1;

    Ok(ValidMove {
        state: next,
        from,
        to: target,
        target_was_active,
    })
}

/// Vertices the ball may currently be kicked to, ignoring whose turn it is.
pub fn legal_targets(state: &GameState) -> Vec<Vertex> {
    let geometry = state.geometry;
    geometry
        .neighbors(state.ball)
        .filter(|&v| claimable_edge(state, v).is_some())
        .collect()
}

/// Moving straight along a touchline column would run the ball down the
/// out-of-bounds line instead of through the pitch.
pub fn slides_along_touchline(geometry: &BoardGeometry, from: Vertex, to: Vertex) -> bool {
    let (_, from_col) = geometry.position(from);
    let (_, to_col) = geometry.position(to);
    from_col == to_col && geometry.is_touchline(from_col)
}

/// Index of the unclaimed edge from the ball to `target`, if kicking along it
/// is allowed.
fn claimable_edge(state: &GameState, target: Vertex) -> Option<usize> {
    let ball = state.ball;
    let index = state.edge_index(ball, target)?;
    if state.edges[index].is_claimed() {
        return None;
    }
    if slides_along_touchline(&state.geometry, ball, target) {
        return None;
    }
    Some(index)
}
