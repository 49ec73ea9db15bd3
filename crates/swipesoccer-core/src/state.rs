use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardGeometry, Edge, Goal, Vertex, VertexMark};
use crate::player::{PlayerId, PlayerInfo};

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The ball reached a goal mouth; `scored_by` kicked it there.
    Goal { goal: Goal, scored_by: usize },
    /// The player in turn has no unclaimed edge to kick along.
    Blocked { stuck: usize },
}

/// Per-match state. Treated as an immutable value: the rules produce a new
/// `GameState` for every accepted move instead of editing one in place.
///
/// Fields are only writable inside this crate so the turn pointer can only
/// move through [`crate::turn::apply_move`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub(crate) geometry: BoardGeometry,
    pub(crate) vertices: Vec<VertexMark>,
    /// Sorted by `(u, v)`.
    pub(crate) edges: Vec<Edge>,
    pub(crate) ball: Vertex,
    pub(crate) player_in_turn: usize,
    pub(crate) players: Vec<PlayerInfo>,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) move_count: u32,
}

impl GameState {
    pub(crate) fn new(board: &Board, players: Vec<PlayerInfo>) -> Self {
        debug_assert!(!players.is_empty(), "a game state needs at least one player");
        Self {
            geometry: board.geometry(),
            vertices: board.vertices().to_vec(),
            edges: board.edges().to_vec(),
            ball: board.initial_ball(),
            player_in_turn: 0,
            players,
            outcome: None,
            move_count: 0,
        }
    }

    pub fn geometry(&self) -> BoardGeometry {
        self.geometry
    }

    pub fn vertices(&self) -> &[VertexMark] {
        &self.vertices
    }

    /// Mark of a vertex; anything off the grid reads as `Removed`.
    pub fn mark(&self, v: Vertex) -> VertexMark {
        self.vertices.get(v).copied().unwrap_or(VertexMark::Removed)
    }

    pub fn is_active(&self, v: Vertex) -> bool {
        self.mark(v) == VertexMark::Active
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub(crate) fn edge_index(&self, a: Vertex, b: Vertex) -> Option<usize> {
        let key = Edge::key(a, b);
        self.edges.binary_search_by_key(&key, |e| (e.u, e.v)).ok()
    }

    /// The edge between `a` and `b`, in either order.
    pub fn edge(&self, a: Vertex, b: Vertex) -> Option<&Edge> {
        self.edge_index(a, b).map(|i| &self.edges[i])
    }

    /// Owner of the edge between `a` and `b`, in either order.
    pub fn owner_of(&self, a: Vertex, b: Vertex) -> Option<usize> {
        self.edge(a, b).and_then(|e| e.owner)
    }

    pub fn ball(&self) -> Vertex {
        self.ball
    }

    pub fn player_in_turn(&self) -> usize {
        self.player_in_turn
    }

    pub fn players(&self) -> &[PlayerInfo] {
        &self.players
    }

    pub fn current_player(&self) -> Option<&PlayerInfo> {
        self.players.get(self.player_in_turn)
    }

    pub fn player_index(&self, id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    /// Edges claimed by the given player index.
    pub fn claimed_by(&self, player: usize) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.owner == Some(player))
    }
}
