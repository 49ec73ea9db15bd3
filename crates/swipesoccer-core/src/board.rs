use serde::{Deserialize, Serialize};

/// Index of a point on the board: `row * cols + col`.
pub type Vertex = usize;

/// Rows of the standard pitch, goal lines included.
pub const STANDARD_ROWS: usize = 11;

/// Columns of the standard pitch, touchlines included.
pub const STANDARD_COLS: usize = 7;

/// Largest pitch, in vertices, whose full state still fits in one wire
/// message.
pub const MAX_VERTICES: usize = 33 * 33;

/// Tri-state mark of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexMark {
    /// Not part of the pitch (corner posts beside the goal lines).
    Removed,
    /// Never visited.
    Inactive,
    /// Visited by the ball or part of the implicit boundary lines.
    Active,
}

/// The two goals behind the goal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Goal {
    /// Behind row 0.
    North,
    /// Behind the last row.
    South,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    TooSmall { rows: usize, cols: usize },
    TooLarge { rows: usize, cols: usize },
    EvenWidth(usize),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSmall { rows, cols } => {
                write!(f, "board {rows}x{cols} is too small (minimum 5x5)")
            },
            Self::TooLarge { rows, cols } => {
                write!(
                    f,
                    "board {rows}x{cols} is too large (at most {MAX_VERTICES} vertices)"
                )
            },
            Self::EvenWidth(cols) => {
                write!(f, "board width {cols} must be odd to have a centre goal mouth")
            },
        }
    }
}

impl std::error::Error for BoardError {}

/// Dimensions of the pitch and the index arithmetic derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardGeometry {
    rows: usize,
    cols: usize,
}

impl Default for BoardGeometry {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl BoardGeometry {
    pub const STANDARD: Self = Self {
        rows: STANDARD_ROWS,
        cols: STANDARD_COLS,
    };

    pub fn new(rows: usize, cols: usize) -> Result<Self, BoardError> {
        if rows < 5 || cols < 5 {
            return Err(BoardError::TooSmall { rows, cols });
        }
        if rows.saturating_mul(cols) > MAX_VERTICES {
            return Err(BoardError::TooLarge { rows, cols });
        }
        if cols % 2 == 0 {
            return Err(BoardError::EvenWidth(cols));
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn vertex_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn contains(&self, v: Vertex) -> bool {
        v < self.vertex_count()
    }

    pub fn vertex(&self, row: usize, col: usize) -> Vertex {
        row * self.cols + col
    }

    /// `(row, col)` of a vertex.
    pub fn position(&self, v: Vertex) -> (usize, usize) {
        (v / self.cols, v % self.cols)
    }

    /// The single column through which the ball can leave the pitch.
    pub fn mouth_col(&self) -> usize {
        self.cols / 2
    }

    pub fn is_touchline(&self, col: usize) -> bool {
        col == 0 || col == self.cols - 1
    }

    /// Rows 0 and `rows - 1` lie behind the goal lines.
    pub fn is_behind_goal_line(&self, row: usize) -> bool {
        row == 0 || row == self.rows - 1
    }

    /// Kick-off point.
    pub fn center(&self) -> Vertex {
        self.vertex(self.rows / 2, self.mouth_col())
    }

    pub fn goal_vertex(&self, goal: Goal) -> Vertex {
        match goal {
            Goal::North => self.vertex(0, self.mouth_col()),
            Goal::South => self.vertex(self.rows - 1, self.mouth_col()),
        }
    }

    /// Which goal, if any, a vertex is the mouth of.
    pub fn goal_at(&self, v: Vertex) -> Option<Goal> {
        if v == self.goal_vertex(Goal::North) {
            Some(Goal::North)
        } else if v == self.goal_vertex(Goal::South) {
            Some(Goal::South)
        } else {
            None
        }
    }

    /// Corner posts beside each goal line.
    pub fn is_removed(&self, v: Vertex) -> bool {
        if !self.contains(v) {
            return false;
        }
        let (row, col) = self.position(v);
        (row == 1 || row == self.rows - 2) && self.is_touchline(col)
    }

    /// 8-neighbourhood of a vertex, clipped to the grid.
    pub fn neighbors(&self, v: Vertex) -> impl Iterator<Item = Vertex> + '_ {
        let (row, col) = self.position(v);
        let rows = row.saturating_sub(1)..=(row + 1).min(self.rows - 1);
        rows.flat_map(move |r| {
            let cols = col.saturating_sub(1)..=(col + 1).min(self.cols - 1);
            cols.map(move |c| self.vertex(r, c))
        })
        .filter(move |&n| n != v)
    }

    fn initial_mark(&self, v: Vertex) -> VertexMark {
        if self.is_removed(v) {
            return VertexMark::Removed;
        }
        let (row, col) = self.position(v);
        let on_goal_line = row == 1 || row == self.rows - 2;
        if self.is_touchline(col) || (on_goal_line && col != self.mouth_col()) {
            VertexMark::Active
        } else {
            VertexMark::Inactive
        }
    }

    /// Whether the unordered pair `(a, b)` of neighbouring vertices forms an
    /// edge of the pitch, goal-mouth edges included.
    fn is_pitch_edge(&self, a: Vertex, b: Vertex) -> bool {
        if self.is_removed(a) || self.is_removed(b) {
            return false;
        }
        let (a_row, a_col) = self.position(a);
        let (b_row, b_col) = self.position(b);
        match (self.is_behind_goal_line(a_row), self.is_behind_goal_line(b_row)) {
            (false, false) => true,
            (true, false) => a_col == self.mouth_col() && b_col.abs_diff(a_col) <= 1,
            (false, true) => b_col == self.mouth_col() && a_col.abs_diff(b_col) <= 1,
            (true, true) => false,
        }
    }
}

/// An unordered pair of adjacent vertices, stored with `u < v`, and the index
/// of the player who claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub u: Vertex,
    pub v: Vertex,
    pub owner: Option<usize>,
}

impl Edge {
    pub fn unclaimed(a: Vertex, b: Vertex) -> Self {
        let (u, v) = Self::key(a, b);
        Self { u, v, owner: None }
    }

    /// Canonical ordering of an endpoint pair.
    pub fn key(a: Vertex, b: Vertex) -> (Vertex, Vertex) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn is_claimed(&self) -> bool {
        self.owner.is_some()
    }
}

/// The generated pitch: topology plus the starting marks and ball.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    geometry: BoardGeometry,
    vertices: Vec<VertexMark>,
    edges: Vec<Edge>,
    ball: Vertex,
}

impl Board {
    /// Build the pitch for the given dimensions. Deterministic.
    pub fn generate(geometry: BoardGeometry) -> Self {
        let mut vertices: Vec<VertexMark> = (0..geometry.vertex_count())
            .map(|v| geometry.initial_mark(v))
            .collect();

        let mut edges: Vec<Edge> = (0..geometry.vertex_count())
            .flat_map(|u| {
                geometry
                    .neighbors(u)
                    .filter(move |&v| v > u)
                    .map(move |v| (u, v))
            })
            .filter(|&(u, v)| geometry.is_pitch_edge(u, v))
            .map(|(u, v)| Edge::unclaimed(u, v))
            .collect();
        edges.sort_by_key(|e| (e.u, e.v));

        let ball = geometry.center();
        vertices[ball] = VertexMark::Active;

        Self {
            geometry,
            vertices,
            edges,
            ball,
        }
    }

    pub fn standard() -> Self {
        Self::generate(BoardGeometry::STANDARD)
    }

    pub fn geometry(&self) -> BoardGeometry {
        self.geometry
    }

    pub fn vertices(&self) -> &[VertexMark] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn initial_ball(&self) -> Vertex {
        self.ball
    }

    pub fn has_edge(&self, a: Vertex, b: Vertex) -> bool {
        let key = Edge::key(a, b);
        self.edges.binary_search_by_key(&key, |e| (e.u, e.v)).is_ok()
    }
}
