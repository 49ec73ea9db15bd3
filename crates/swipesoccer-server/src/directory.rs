use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{MutexGuard, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use swipesoccer_core::board::{Board, Vertex};
use swipesoccer_core::game::{Game, GameId, GamePhase};
use swipesoccer_core::net::messages::{GameStateMsg, ServerMessage};
use swipesoccer_core::net::protocol::encode_server_message;
use swipesoccer_core::player::{PlayerId, PlayerInfo};
use swipesoccer_core::reject::RejectReason;
use swipesoccer_core::turn::TurnResult;

use crate::presence::{ConnectionId, PresenceTracker};
use crate::store::{GameStore, StoreError};

/// Per-player sender for outbound WebSocket binary messages. Bounded so a
/// slow client cannot grow memory without limit.
pub type PlayerSender = mpsc::Sender<Bytes>;

struct ChannelMember {
    connection: ConnectionId,
    sender: PlayerSender,
}

/// One live game: the record behind its own lock, plus the transport
/// channel of the connections watching it.
pub struct GameSlot {
    game: tokio::sync::Mutex<Game>,
    channel: Mutex<HashMap<PlayerId, ChannelMember>>,
    /// Creation order within this directory.
    seq: u64,
    last_activity: Mutex<Instant>,
    /// Mirrors of the locked record so listings never wait on a game lock.
    joinable: AtomicBool,
    seated: AtomicUsize,
    /// Set under the game lock when the game leaves the directory.
    removed: AtomicBool,
    /// Bumped under the game lock on every change.
    version: AtomicU64,
    /// Last version written to the store. Held for the whole store call so
    /// writes of one game never interleave.
    stored: Mutex<u64>,
}

impl GameSlot {
    fn new(game: Game, seq: u64) -> Self {
        Self {
            seq,
            joinable: AtomicBool::new(game.is_joinable()),
            seated: AtomicUsize::new(game.players.len()),
            removed: AtomicBool::new(false),
            version: AtomicU64::new(1),
            stored: Mutex::new(0),
            channel: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(Instant::now()),
            game: tokio::sync::Mutex::new(game),
        }
    }

    /// Refresh the mirrors after a change made under the game lock. Returns
    /// the new version to persist.
    fn refresh(&self, game: &Game) -> u64 {
        self.joinable.store(game.is_joinable(), Ordering::Release);
        self.seated.store(game.players.len(), Ordering::Release);
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn senders(&self) -> Vec<(PlayerId, PlayerSender)> {
        let channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        channel
            .iter()
            .map(|(&pid, member)| (pid, member.sender.clone()))
            .collect()
    }
}

/// Registry of live games. The index lock is only held for lookups,
/// inserts and removals; every change to a game happens under that game's
/// own lock.
pub struct SessionDirectory {
    games: RwLock<HashMap<GameId, Arc<GameSlot>>>,
    next_seq: AtomicU64,
    board: Board,
    max_players: usize,
    lock_timeout: Duration,
    store: Arc<dyn GameStore>,
}

impl SessionDirectory {
    pub fn new(
        board: Board,
        max_players: usize,
        lock_timeout: Duration,
        store: Arc<dyn GameStore>,
    ) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            board,
            max_players,
            lock_timeout,
            store,
        }
    }

    async fn slot(&self, id: GameId) -> Option<Arc<GameSlot>> {
        self.games.read().await.get(&id).cloned()
    }

    async fn lock<'a>(&self, slot: &'a GameSlot) -> Result<MutexGuard<'a, Game>, RejectReason> {
        let guard = tokio::time::timeout(self.lock_timeout, slot.game.lock())
            .await
            .map_err(|_| RejectReason::GameBusy)?;
        if slot.removed.load(Ordering::Acquire) {
            return Err(RejectReason::GameNotFound);
        }
        Ok(guard)
    }

    async fn lock_cancellable<'a>(
        &self,
        slot: &'a GameSlot,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'a, Game>, RejectReason> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RejectReason::Disconnected),
            guard = self.lock(slot) => guard,
        }
    }

    /// Write a snapshot taken at `version` to the store on the blocking pool.
    /// Call only after the game lock is released. A snapshot older than the
    /// one already stored, or of a removed game, is dropped.
    async fn persist(&self, slot: &Arc<GameSlot>, game: Game, version: u64) {
        let store = Arc::clone(&self.store);
        let slot = Arc::clone(slot);
        let game_id = game.id;
        let result = tokio::task::spawn_blocking(move || {
            let mut stored = slot.stored.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.removed.load(Ordering::Acquire) || *stored >= version {
                return Ok(());
            }
            store.save(&game)?;
            *stored = version;
            Ok::<(), StoreError>(())
        })
        .await;
        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                tracing::warn!(game_id = %game_id, error = %e, "Failed to persist game");
            },
            Err(e) => {
                tracing::warn!(game_id = %game_id, error = %e, "Persist task failed");
            },
        }
    }

    /// Delete the stored copy of a game already marked removed.
    async fn unpersist(&self, slot: &Arc<GameSlot>, game_id: GameId) {
        let store = Arc::clone(&self.store);
        let slot = Arc::clone(slot);
        let result = tokio::task::spawn_blocking(move || {
            let _stored = slot.stored.lock().unwrap_or_else(PoisonError::into_inner);
            store.delete(game_id)
        })
        .await;
        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                tracing::warn!(game_id = %game_id, error = %e, "Failed to delete persisted game");
            },
            Err(e) => {
                tracing::warn!(game_id = %game_id, error = %e, "Delete task failed");
            },
        }
    }

    /// Hold the game's lock until the returned sender is dropped or fired.
    #[cfg(test)]
    pub(crate) async fn hold_lock(&self, game_id: GameId) -> tokio::sync::oneshot::Sender<()> {
        let slot = self.slot(game_id).await.expect("game exists");
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let _guard = slot.game.lock().await;
            let _ = locked_tx.send(());
            let _ = release_rx.await;
        });
        locked_rx.await.expect("lock taken");
        release_tx
    }

    /// Oldest live game that is waiting for players and has a free seat.
    pub async fn find_joinable(&self) -> Option<GameId> {
        let games = self.games.read().await;
        games
            .iter()
            .filter(|(_, slot)| slot.joinable.load(Ordering::Acquire))
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(&id, _)| id)
    }

    /// Create a waiting game with `host` as its only member.
    pub async fn create_game(&self, host: PlayerInfo) -> Game {
        let game = Game::new(Uuid::new_v4(), host, self.max_players);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(GameSlot::new(game.clone(), seq));
        self.games.write().await.insert(game.id, Arc::clone(&slot));
        tracing::info!(game_id = %game.id, host = %game.host, "Game created");
        self.persist(&slot, game.clone(), 1).await;
        game
    }

    /// Add `player` to a waiting game and start it if the roster is now full.
    /// Joining a game one is already a member of is a no-op that still
    /// returns the game.
    pub async fn join_game(
        &self,
        player: PlayerInfo,
        game_id: GameId,
        cancel: &CancellationToken,
    ) -> Result<Game, RejectReason> {
        let slot = self.slot(game_id).await.ok_or(RejectReason::GameNotFound)?;
        let (game, version) = {
            let mut game = self.lock_cancellable(&slot, cancel).await?;
            let player_id = player.id;
            if game.join(player)? {
                tracing::info!(game_id = %game_id, player_id = %player_id, "Player joined game");
            }
            self.start_locked(&mut game);
            let version = slot.refresh(&game);
            (game.clone(), version)
        };
        self.persist(&slot, game.clone(), version).await;
        Ok(game)
    }

    /// Rejoin a live, unfinished game the player is already seated in, with
    /// their current display name.
    pub async fn rejoin(
        &self,
        player: &PlayerInfo,
        game_id: GameId,
        cancel: &CancellationToken,
    ) -> Result<Game, RejectReason> {
        let slot = self.slot(game_id).await.ok_or(RejectReason::GameNotFound)?;
        let (game, version) = {
            let mut game = self.lock_cancellable(&slot, cancel).await?;
            if !game.is_member(player.id) {
                return Err(RejectReason::GameNotFound);
            }
            if game.phase() == GamePhase::Finished {
                return Err(RejectReason::GameOver);
            }
            game.rename_player(player.id, &player.name);
            let version = slot.refresh(&game);
            (game.clone(), version)
        };
        self.persist(&slot, game.clone(), version).await;
        Ok(game)
    }

    /// Start the game if its roster is full and it has not started yet.
    pub async fn maybe_start(&self, game_id: GameId) -> Result<bool, RejectReason> {
        let slot = self.slot(game_id).await.ok_or(RejectReason::GameNotFound)?;
        let started = {
            let mut game = self.lock(&slot).await?;
            self.start_locked(&mut game)
                .then(|| (game.clone(), slot.refresh(&game)))
        };
        let Some((game, version)) = started else {
            return Ok(false);
        };
        self.persist(&slot, game, version).await;
        Ok(true)
    }

    fn start_locked(&self, game: &mut Game) -> bool {
        let started = game.start(&self.board);
        if started {
            tracing::info!(
                game_id = %game.id,
                players = game.players.len(),
                "Game started"
            );
        }
        started
    }

    /// Validate and apply a kick, then broadcast the new state once the game
    /// lock has been released. Rejections change nothing and broadcast nothing.
    pub async fn submit_move(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        target: Vertex,
    ) -> Result<TurnResult, RejectReason> {
        let slot = self.slot(game_id).await.ok_or(RejectReason::GameNotFound)?;
        let (game, kick, version) = {
            let mut game = self.lock(&slot).await?;
            let kick = game.apply_move(player_id, target)?;
            let version = slot.refresh(&game);
            (game.clone(), kick, version)
        };

        tracing::debug!(
            game_id = %game_id,
            player_id = %player_id,
            from = kick.from,
            to = kick.to,
            extra_turn = kick.extra_turn,
            "Kick accepted"
        );
        if let Some(outcome) = kick.outcome {
            tracing::info!(game_id = %game_id, ?outcome, "Game finished");
        }

        broadcast(&slot, &game);
        let state = game
            .state()
            .cloned()
            .ok_or(RejectReason::GameNotStarted)?;
        self.persist(&slot, game, version).await;
        Ok(TurnResult { state, kick })
    }

    /// Remove the game if no member of its roster is connected. Returns
    /// whether this call removed it; repeated or concurrent calls remove it at
    /// most once.
    pub async fn purge_if_inactive(&self, game_id: GameId, presence: &PresenceTracker) -> bool {
        let Some(slot) = self.slot(game_id).await else {
            return false;
        };
        let game = match self.lock(&slot).await {
            Ok(game) => game,
            Err(RejectReason::GameBusy) => {
                tracing::warn!(game_id = %game_id, "Purge skipped, game busy");
                return false;
            },
            Err(_) => return false,
        };

        let members: Vec<PlayerId> = game.players.iter().map(|p| p.id).collect();
        if presence.any_connected(&members).await {
            return false;
        }
        self.remove_locked(&slot, &game, presence).await;
        tracing::info!(game_id = %game_id, phase = ?game.phase(), "Purged inactive game");
        drop(game);
        self.unpersist(&slot, game_id).await;
        true
    }

    /// Unlist a game while holding its lock. Later lock holders see the
    /// removed flag and report `GameNotFound`.
    /// The stored copy is left for [`Self::unpersist`] once the lock is
    /// released.
    async fn remove_locked(&self, slot: &GameSlot, game: &Game, presence: &PresenceTracker) {
        slot.removed.store(true, Ordering::Release);
        slot.joinable.store(false, Ordering::Release);
        self.games.write().await.remove(&game.id);
        let members: Vec<PlayerId> = game.players.iter().map(|p| p.id).collect();
        presence.clear_game(game.id, &members).await;
        slot.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Route broadcasts for `player` in this game to `sender`, replacing any
    /// earlier connection of the same player.
    pub async fn join_channel(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        connection: ConnectionId,
        sender: PlayerSender,
    ) -> bool {
        let Some(slot) = self.slot(game_id).await else {
            return false;
        };
        slot.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player_id, ChannelMember { connection, sender });
        true
    }

    /// Stop routing broadcasts to `connection`. A newer connection of the
    /// same player stays subscribed.
    pub async fn leave_channel(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        connection: ConnectionId,
    ) {
        if let Some(slot) = self.slot(game_id).await {
            let mut channel = slot.channel.lock().unwrap_or_else(PoisonError::into_inner);
            if channel
                .get(&player_id)
                .is_some_and(|member| member.connection == connection)
            {
                channel.remove(&player_id);
            }
        }
    }

    /// Send the current state of the game to everyone in its channel.
    pub async fn broadcast_game(&self, game_id: GameId) -> Result<(), RejectReason> {
        let slot = self.slot(game_id).await.ok_or(RejectReason::GameNotFound)?;
        let game = self.lock(&slot).await?.clone();
        broadcast(&slot, &game);
        Ok(())
    }

    pub async fn snapshot(&self, game_id: GameId) -> Option<Game> {
        let slot = self.slot(game_id).await?;
        let game = self.lock(&slot).await.ok()?;
        Some(game.clone())
    }

    /// (live games, seated players)
    pub async fn stats(&self) -> (usize, usize) {
        let games = self.games.read().await;
        let seated = games
            .values()
            .map(|slot| slot.seated.load(Ordering::Acquire))
            .sum();
        (games.len(), seated)
    }

    /// Remove games untouched for longer than `max_idle` whose members are
    /// all disconnected. Games that are locked right now are in use and
    /// skipped.
    pub async fn cleanup_idle_games(&self, max_idle: Duration, presence: &PresenceTracker) -> usize {
        let stale: Vec<Arc<GameSlot>> = {
            let games = self.games.read().await;
            games
                .values()
                .filter(|slot| slot.idle_for() >= max_idle)
                .cloned()
                .collect()
        };

        let mut removed = 0;
        for slot in stale {
            let Ok(game) = slot.game.try_lock() else {
                continue;
            };
            if slot.removed.load(Ordering::Acquire) {
                continue;
            }
            let members: Vec<PlayerId> = game.players.iter().map(|p| p.id).collect();
            if presence.any_connected(&members).await {
                continue;
            }
            let game_id = game.id;
            self.remove_locked(&slot, &game, presence).await;
            tracing::info!(game_id = %game_id, "Removed idle game");
            drop(game);
            self.unpersist(&slot, game_id).await;
            removed += 1;
        }
        removed
    }
}

fn broadcast(slot: &GameSlot, game: &Game) {
    let msg = ServerMessage::GameState(Box::new(GameStateMsg {
        game_id: game.id,
        phase: game.phase(),
        players: game.players.clone(),
        max_players: game.max_players,
        state: game.state().cloned(),
    }));
    let data = match encode_server_message(&msg) {
        Ok(data) => Bytes::from(data),
        Err(e) => {
            tracing::warn!(game_id = %game.id, error = %e, "Failed to encode game state");
            return;
        },
    };
    for (pid, sender) in slot.senders() {
        if let Err(e) = sender.try_send(data.clone()) {
            tracing::debug!(
                player_id = %pid, game_id = %game.id, error = %e,
                "Skipping broadcast to slow client"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use swipesoccer_core::net::protocol::decode_server_message;
    use swipesoccer_core::test_helpers::make_players;

    fn directory() -> SessionDirectory {
        directory_with(2, Arc::new(MemoryStore::new()))
    }

    fn directory_with(max_players: usize, store: Arc<dyn GameStore>) -> SessionDirectory {
        SessionDirectory::new(
            Board::standard(),
            max_players,
            Duration::from_millis(500),
            store,
        )
    }

    fn make_sender() -> (PlayerSender, mpsc::Receiver<Bytes>) {
        mpsc::channel(16)
    }

    fn read_state(rx: &mut mpsc::Receiver<Bytes>) -> GameStateMsg {
        let data = rx.try_recv().expect("expected a broadcast");
        match decode_server_message(&data).unwrap() {
            ServerMessage::GameState(msg) => *msg,
            other => panic!("Expected GameState, got: {other:?}"),
        }
    }

    async fn started(dir: &SessionDirectory) -> (Game, Vec<PlayerInfo>) {
        let players = make_players(2);
        let game = dir.create_game(players[0].clone()).await;
        let game = dir
            .join_game(players[1].clone(), game.id, &CancellationToken::new())
            .await
            .unwrap();
        (game, players)
    }

    #[tokio::test]
    async fn create_then_join_starts_game() {
        let dir = directory();
        let players = make_players(2);
        let game = dir.create_game(players[0].clone()).await;
        assert_eq!(game.phase(), GamePhase::Waiting);
        assert_eq!(dir.find_joinable().await, Some(game.id));

        let joined = dir
            .join_game(players[1].clone(), game.id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(joined.phase(), GamePhase::InProgress);
        let state = joined.state().unwrap();
        assert_eq!(state.players(), &players[..]);
        assert_eq!(state.player_in_turn(), 0);
        assert_eq!(state.ball(), 38);

        assert_eq!(dir.find_joinable().await, None);
        assert_eq!(dir.stats().await, (1, 2));
        // Already started: a second start is a no-op.
        assert_eq!(dir.maybe_start(game.id).await, Ok(false));
    }

    #[tokio::test]
    async fn find_joinable_prefers_oldest() {
        let dir = directory();
        let players = make_players(2);
        let first = dir.create_game(players[0].clone()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        dir.create_game(players[1].clone()).await;
        assert_eq!(dir.find_joinable().await, Some(first.id));
    }

    #[tokio::test]
    async fn find_joinable_keeps_creation_order_within_a_millisecond() {
        let dir = directory();
        let mut created = Vec::new();
        for host in make_players(16) {
            created.push(dir.create_game(host).await.id);
        }
        let cancel = CancellationToken::new();
        for (expected, joiner) in created.iter().zip(make_players(16)) {
            assert_eq!(dir.find_joinable().await, Some(*expected));
            dir.join_game(joiner, *expected, &cancel).await.unwrap();
        }
        assert_eq!(dir.find_joinable().await, None);
    }

    #[tokio::test]
    async fn join_rejections() {
        let dir = directory();
        let (game, _) = started(&dir).await;
        let outsider = make_players(1).remove(0);
        let cancel = CancellationToken::new();

        assert_eq!(
            dir.join_game(outsider.clone(), game.id, &cancel)
                .await
                .unwrap_err(),
            RejectReason::GameAlreadyStarted
        );
        assert_eq!(
            dir.join_game(outsider, GameId::new_v4(), &cancel)
                .await
                .unwrap_err(),
            RejectReason::GameNotFound
        );
    }

    #[tokio::test]
    async fn three_player_game_waits_for_full_roster() {
        let dir = directory_with(3, Arc::new(MemoryStore::new()));
        let players = make_players(3);
        let cancel = CancellationToken::new();
        let game = dir.create_game(players[0].clone()).await;
        let g = dir
            .join_game(players[1].clone(), game.id, &cancel)
            .await
            .unwrap();
        assert_eq!(g.phase(), GamePhase::Waiting);
        assert_eq!(dir.maybe_start(game.id).await, Ok(false));
        let g = dir
            .join_game(players[2].clone(), game.id, &cancel)
            .await
            .unwrap();
        assert_eq!(g.phase(), GamePhase::InProgress);
    }

    #[tokio::test]
    async fn accepted_move_is_persisted_and_broadcast() {
        let store = Arc::new(MemoryStore::new());
        let dir = directory_with(2, Arc::clone(&store) as Arc<dyn GameStore>);
        let (game, players) = started(&dir).await;
        let (tx_a, mut rx_a) = make_sender();
        let (tx_b, mut rx_b) = make_sender();
        dir.join_channel(game.id, players[0].id, 1, tx_a).await;
        dir.join_channel(game.id, players[1].id, 2, tx_b).await;

        let result = dir.submit_move(game.id, players[0].id, 37).await.unwrap();
        assert_eq!(result.state.ball(), 37);
        assert_eq!(result.state.player_in_turn(), 1);

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = read_state(rx);
            assert_eq!(msg.game_id, game.id);
            assert_eq!(msg.state.as_ref().unwrap().ball(), 37);
        }
        let stored = store.load(game.id).unwrap().unwrap();
        assert_eq!(stored.state().unwrap().owner_of(37, 38), Some(0));
    }

    #[tokio::test]
    async fn rejected_move_changes_nothing_and_is_silent() {
        let dir = directory();
        let (game, players) = started(&dir).await;
        let (tx, mut rx) = make_sender();
        dir.join_channel(game.id, players[0].id, 1, tx).await;

        assert_eq!(
            dir.submit_move(game.id, players[1].id, 37).await.unwrap_err(),
            RejectReason::NotYourTurn
        );
        assert_eq!(
            dir.submit_move(game.id, players[0].id, 38).await.unwrap_err(),
            RejectReason::IllegalMove
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(dir.snapshot(game.id).await.unwrap(), game);
    }

    #[tokio::test]
    async fn concurrent_kicks_accept_exactly_one() {
        let dir = Arc::new(directory());
        let (game, players) = started(&dir).await;

        let mut handles = Vec::new();
        for target in [30, 31, 32, 37, 39, 44, 45, 46] {
            let dir = Arc::clone(&dir);
            let player = players[0].id;
            handles.push(tokio::spawn(async move {
                dir.submit_move(game.id, player, target).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(reason) => assert_eq!(reason, RejectReason::NotYourTurn),
            }
        }
        assert_eq!(accepted, 1);
        let state = dir.snapshot(game.id).await.unwrap().state().cloned().unwrap();
        assert_eq!(state.move_count(), 1);
        assert_eq!(state.edges().iter().filter(|e| e.is_claimed()).count(), 1);
    }

    #[tokio::test]
    async fn older_snapshot_never_overwrites_newer() {
        let store = Arc::new(MemoryStore::new());
        let dir = directory_with(2, Arc::clone(&store) as Arc<dyn GameStore>);
        let (game, players) = started(&dir).await;
        let before_kick = dir.snapshot(game.id).await.unwrap();
        dir.submit_move(game.id, players[0].id, 37).await.unwrap();

        let slot = dir.slot(game.id).await.unwrap();
        dir.persist(&slot, before_kick, 1).await;
        let stored = store.load(game.id).unwrap().unwrap();
        assert_eq!(stored.state().unwrap().ball(), 37);
    }

    /// Store whose writes take a while.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl GameStore for SlowStore {
        fn load(&self, id: GameId) -> Result<Option<Game>, StoreError> {
            self.inner.load(id)
        }

        fn save(&self, game: &Game) -> Result<(), StoreError> {
            std::thread::sleep(self.delay);
            self.inner.save(game)
        }

        fn delete(&self, id: GameId) -> Result<(), StoreError> {
            self.inner.delete(id)
        }

        fn list(&self) -> Result<Vec<Game>, StoreError> {
            self.inner.list()
        }
    }

    #[tokio::test]
    async fn slow_store_does_not_hold_the_game_lock() {
        let slow = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
        });
        let dir = Arc::new(directory_with(
            2,
            Arc::clone(&slow) as Arc<dyn GameStore>,
        ));
        let (game, players) = started(&dir).await;

        let kick = {
            let dir = Arc::clone(&dir);
            let player = players[0].id;
            tokio::spawn(async move { dir.submit_move(game.id, player, 37).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The kick is applied and visible while its write is still running.
        let seen = tokio::time::timeout(Duration::from_millis(200), dir.snapshot(game.id))
            .await
            .expect("lock free during store write")
            .unwrap();
        assert_eq!(seen.state().unwrap().move_count(), 1);
        let stored = slow.inner.load(game.id).unwrap().unwrap();
        assert_eq!(stored.state().unwrap().move_count(), 0);

        kick.await.unwrap().unwrap();
        let stored = slow.inner.load(game.id).unwrap().unwrap();
        assert_eq!(stored.state().unwrap().move_count(), 1);
    }

    #[tokio::test]
    async fn busy_game_reports_game_busy() {
        let dir = directory();
        let (game, players) = started(&dir).await;
        let slot = dir.slot(game.id).await.unwrap();
        let _held = slot.game.lock().await;
        assert_eq!(
            dir.submit_move(game.id, players[0].id, 37).await.unwrap_err(),
            RejectReason::GameBusy
        );
    }

    #[tokio::test]
    async fn cancelled_join_reports_disconnected() {
        let dir = directory();
        let players = make_players(2);
        let game = dir.create_game(players[0].clone()).await;
        let slot = dir.slot(game.id).await.unwrap();
        let held = slot.game.lock().await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            dir.join_game(players[1].clone(), game.id, &cancel)
                .await
                .unwrap_err(),
            RejectReason::Disconnected
        );
        drop(held);
        assert_eq!(dir.snapshot(game.id).await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn purge_waits_for_every_member_then_runs_once() {
        let store = Arc::new(MemoryStore::new());
        let dir = directory_with(2, Arc::clone(&store) as Arc<dyn GameStore>);
        let presence = PresenceTracker::new(16);
        let (a, _) = presence.bind(1, "a", "A").await;
        let (b, _) = presence.bind(2, "b", "B").await;
        let pa = PlayerInfo::new(a.id, "A");
        let pb = PlayerInfo::new(b.id, "B");

        let game = dir.create_game(pa).await;
        dir.join_game(pb, game.id, &CancellationToken::new())
            .await
            .unwrap();
        presence.set_active_game(a.id, Some(game.id)).await;
        presence.set_active_game(b.id, Some(game.id)).await;

        presence.unbind(1).await;
        assert!(!dir.purge_if_inactive(game.id, &presence).await);
        assert!(dir.snapshot(game.id).await.is_some());

        presence.unbind(2).await;
        assert!(dir.purge_if_inactive(game.id, &presence).await);
        assert!(!dir.purge_if_inactive(game.id, &presence).await);

        assert!(dir.snapshot(game.id).await.is_none());
        assert!(store.load(game.id).unwrap().is_none());
        assert_eq!(presence.active_game_of(a.id).await, None);
        assert_eq!(presence.active_game_of(b.id).await, None);
        assert_eq!(
            dir.submit_move(game.id, a.id, 37).await.unwrap_err(),
            RejectReason::GameNotFound
        );
    }

    #[tokio::test]
    async fn concurrent_purges_remove_once() {
        let dir = Arc::new(directory());
        let presence = Arc::new(PresenceTracker::new(16));
        let players = make_players(1);
        let game = dir.create_game(players[0].clone()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dir = Arc::clone(&dir);
            let presence = Arc::clone(&presence);
            handles.push(tokio::spawn(async move {
                dir.purge_if_inactive(game.id, &presence).await
            }));
        }
        let mut purged = 0;
        for handle in handles {
            if handle.await.unwrap() {
                purged += 1;
            }
        }
        assert_eq!(purged, 1);
        assert_eq!(dir.stats().await, (0, 0));
    }

    #[tokio::test]
    async fn leave_channel_ignores_stale_connection() {
        let dir = directory();
        let (game, players) = started(&dir).await;
        let (old_tx, _old_rx) = make_sender();
        let (new_tx, mut new_rx) = make_sender();
        dir.join_channel(game.id, players[0].id, 1, old_tx).await;
        dir.join_channel(game.id, players[0].id, 2, new_tx).await;

        dir.leave_channel(game.id, players[0].id, 1).await;
        dir.broadcast_game(game.id).await.unwrap();
        assert_eq!(read_state(&mut new_rx).game_id, game.id);

        dir.leave_channel(game.id, players[0].id, 2).await;
        dir.broadcast_game(game.id).await.unwrap();
        assert!(new_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejoin_refreshes_name_and_refuses_strangers() {
        let dir = directory();
        let (game, players) = started(&dir).await;
        let cancel = CancellationToken::new();
        let renamed = PlayerInfo::new(players[1].id, "Renamed");
        let g = dir.rejoin(&renamed, game.id, &cancel).await.unwrap();
        assert_eq!(g.players[1].name, "Renamed");

        let stranger = make_players(1).remove(0);
        assert_eq!(
            dir.rejoin(&stranger, game.id, &cancel).await.unwrap_err(),
            RejectReason::GameNotFound
        );
    }

    #[tokio::test]
    async fn idle_cleanup_removes_untouched_games() {
        let dir = directory();
        let presence = PresenceTracker::new(16);
        let players = make_players(1);
        dir.create_game(players[0].clone()).await;

        assert_eq!(
            dir.cleanup_idle_games(Duration::from_secs(3600), &presence)
                .await,
            0
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            dir.cleanup_idle_games(Duration::from_millis(10), &presence)
                .await,
            1
        );
        assert_eq!(dir.stats().await, (0, 0));
    }

    #[tokio::test]
    async fn idle_cleanup_spares_games_with_a_connected_member() {
        let dir = directory();
        let presence = PresenceTracker::new(16);
        let (host, _) = presence.bind(1, "host", "Host").await;
        let game = dir.create_game(PlayerInfo::new(host.id, "Host")).await;
        presence.set_active_game(host.id, Some(game.id)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            dir.cleanup_idle_games(Duration::from_millis(10), &presence)
                .await,
            0
        );
        assert_eq!(dir.find_joinable().await, Some(game.id));
        assert_eq!(presence.active_game_of(host.id).await, Some(game.id));

        presence.unbind(1).await;
        assert_eq!(
            dir.cleanup_idle_games(Duration::from_millis(10), &presence)
                .await,
            1
        );
        assert_eq!(presence.active_game_of(host.id).await, None);
    }
}
