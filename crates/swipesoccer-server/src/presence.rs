use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use swipesoccer_core::game::GameId;
use swipesoccer_core::player::PlayerId;

/// Identifier of one live transport connection.
pub type ConnectionId = u64;

/// Durable player record, keyed by the caller's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: PlayerId,
    pub name: String,
    pub connection: Option<ConnectionId>,
    /// Lookup only; the directory owns the game.
    pub active_game: Option<GameId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    PlayerDisconnected {
        player_id: PlayerId,
        connection: ConnectionId,
        game_id: Option<GameId>,
    },
}

#[derive(Default)]
struct PresenceInner {
    identities: HashMap<PlayerId, Identity>,
    tokens: HashMap<String, PlayerId>,
    connections: HashMap<ConnectionId, PlayerId>,
    cancels: HashMap<ConnectionId, CancellationToken>,
}

/// Binds live connections to durable identities.
pub struct PresenceTracker {
    inner: RwLock<PresenceInner>,
    next_connection: AtomicU64,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: RwLock::new(PresenceInner::default()),
            next_connection: AtomicU64::new(1),
            events,
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Bind `connection` to the identity for `token`, creating it on first
    /// sight. A connection previously bound to the same identity is cancelled
    /// and forgotten without a disconnect event.
    ///
    /// The returned token is cancelled when this connection is unbound or
    /// superseded.
    pub async fn bind(
        &self,
        connection: ConnectionId,
        token: &str,
        name: &str,
    ) -> (Identity, CancellationToken) {
        let mut inner = self.inner.write().await;
        let existing = inner.tokens.get(token).copied();
        let player_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                inner.tokens.insert(token.to_string(), id);
                tracing::debug!(player_id = %id, "New identity");
                id
            },
        };

        let previous = inner
            .identities
            .get(&player_id)
            .and_then(|identity| identity.connection);
        if let Some(old) = previous
            && old != connection
        {
            inner.connections.remove(&old);
            if let Some(cancel) = inner.cancels.remove(&old) {
                cancel.cancel();
            }
            tracing::info!(player_id = %player_id, old, new = connection, "Connection superseded");
        }

        let cancel = CancellationToken::new();
        inner.connections.insert(connection, player_id);
        if let Some(stale) = inner.cancels.insert(connection, cancel.clone()) {
            stale.cancel();
        }

        let identity = inner.identities.entry(player_id).or_insert_with(|| Identity {
            id: player_id,
            name: String::new(),
            connection: None,
            active_game: None,
        });
        identity.name = name.to_string();
        identity.connection = Some(connection);
        (identity.clone(), cancel)
    }

    /// Drop the binding of `connection`, cancel its pending work and emit
    /// `PlayerDisconnected`. Unknown or superseded connections are a no-op.
    pub async fn unbind(&self, connection: ConnectionId) -> Option<Identity> {
        let identity = {
            let mut inner = self.inner.write().await;
            if let Some(cancel) = inner.cancels.remove(&connection) {
                cancel.cancel();
            }
            let player_id = inner.connections.remove(&connection)?;
            let identity = inner.identities.get_mut(&player_id)?;
            identity.connection = None;
            identity.clone()
        };

        // Nobody listening is fine; the idle sweeper still reclaims games.
        let _ = self.events.send(PresenceEvent::PlayerDisconnected {
            player_id: identity.id,
            connection,
            game_id: identity.active_game,
        });
        Some(identity)
    }

    pub async fn player_of(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.inner.read().await.connections.get(&connection).copied()
    }

    pub async fn active_game_of(&self, player: PlayerId) -> Option<GameId> {
        self.inner
            .read()
            .await
            .identities
            .get(&player)
            .and_then(|identity| identity.active_game)
    }

    pub async fn set_active_game(&self, player: PlayerId, game: Option<GameId>) {
        if let Some(identity) = self.inner.write().await.identities.get_mut(&player) {
            identity.active_game = game;
        }
    }

    /// Clear `game` from the members' active-game references. References that
    /// already point elsewhere are left alone.
    pub async fn clear_game(&self, game: GameId, members: &[PlayerId]) {
        let mut inner = self.inner.write().await;
        for member in members {
            if let Some(identity) = inner.identities.get_mut(member)
                && identity.active_game == Some(game)
            {
                identity.active_game = None;
            }
        }
    }

    pub async fn is_connected(&self, player: PlayerId) -> bool {
        self.inner
            .read()
            .await
            .identities
            .get(&player)
            .is_some_and(|identity| identity.connection.is_some())
    }

    pub async fn any_connected(&self, players: &[PlayerId]) -> bool {
        let inner = self.inner.read().await;
        players.iter().any(|p| {
            inner
                .identities
                .get(p)
                .is_some_and(|identity| identity.connection.is_some())
        })
    }

    /// (known identities, live connections)
    pub async fn stats(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.identities.len(), inner.connections.len())
    }
}
