pub mod board;
pub mod game;
pub mod net;
pub mod player;
pub mod reject;
pub mod rules;
pub mod state;
pub mod time;
pub mod turn;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use uuid::Uuid;

    use crate::board::{Board, Vertex};
    use crate::game::{Game, GameId};
    use crate::player::PlayerInfo;
    use crate::state::GameState;
    use crate::turn;

    /// Create `n` test players named `Player1..=PlayerN` with random ids.
    pub fn make_players(n: usize) -> Vec<PlayerInfo> {
        (0..n)
            .map(|i| PlayerInfo::new(Uuid::new_v4(), format!("Player{}", i + 1)))
            .collect()
    }

    /// Kick to each target in order as whoever is in turn. Panics on the
    /// first rejected kick.
    pub fn play(mut state: GameState, targets: &[Vertex]) -> GameState {
        for &target in targets {
            let acting = state.player_in_turn();
            state = turn::apply_move(&state, acting, target)
                .unwrap_or_else(|e| panic!("kick to {target} by {acting} rejected: {e}"))
                .state;
        }
        state
    }

    /// A standard-board game with `n` players that has already started.
    pub fn started_game(n: usize) -> (Game, Vec<PlayerInfo>) {
        let players = make_players(n);
        let mut game = Game::new(GameId::new_v4(), players[0].clone(), n);
        for p in &players[1..] {
            game.join(p.clone()).expect("join test player");
        }
        assert!(game.start(&Board::standard()), "game should start");
        (game, players)
    }
}
