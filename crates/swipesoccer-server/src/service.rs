use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use swipesoccer_core::board::Vertex;
use swipesoccer_core::game::{Game, GameId};
use swipesoccer_core::player::{
    DEFAULT_PLAYER_NAME, PlayerId, PlayerInfo, is_valid_token, sanitize_name,
};
use swipesoccer_core::reject::RejectReason;
use swipesoccer_core::turn::TurnResult;

use crate::directory::{PlayerSender, SessionDirectory};
use crate::presence::{ConnectionId, Identity, PresenceTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    InvalidToken,
    InvalidName,
    Rejected(RejectReason),
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidToken => write!(f, "Invalid identity token"),
            Self::InvalidName => write!(f, "Invalid player name"),
            Self::Rejected(reason) => write!(f, "Registration failed: {reason}"),
        }
    }
}

impl std::error::Error for RegisterError {}

impl From<RejectReason> for RegisterError {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

/// A successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub player: PlayerInfo,
    pub game: Game,
    /// Cancelled once this connection is unbound or superseded.
    pub cancel: CancellationToken,
}

/// The public operations of the session engine.
pub struct GameService {
    presence: Arc<PresenceTracker>,
    directory: Arc<SessionDirectory>,
    matchmaking_attempts: usize,
}

impl GameService {
    pub fn new(
        presence: Arc<PresenceTracker>,
        directory: Arc<SessionDirectory>,
        matchmaking_attempts: usize,
    ) -> Self {
        Self {
            presence,
            directory,
            matchmaking_attempts: matchmaking_attempts.max(1),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Bind `connection` to the identity behind `token`, put the player in a
    /// game and subscribe `sender` to that game's broadcasts.
    ///
    /// A player whose previous game is still live and unfinished goes back to
    /// it. Everyone else joins the oldest waiting game or starts a new one.
    pub async fn register(
        &self,
        connection: ConnectionId,
        token: &str,
        name: Option<&str>,
        sender: PlayerSender,
    ) -> Result<Registration, RegisterError> {
        if !is_valid_token(token) {
            return Err(RegisterError::InvalidToken);
        }
        let name = match name.map(str::trim) {
            None | Some("") => DEFAULT_PLAYER_NAME.to_string(),
            Some(raw) => sanitize_name(raw).ok_or(RegisterError::InvalidName)?,
        };

        let (identity, cancel) = self.presence.bind(connection, token, &name).await;
        let player = PlayerInfo::new(identity.id, identity.name.clone());

        let game = match self.resume(&identity, &player, &cancel).await? {
            Some(game) => game,
            None => self.matchmake(&player, &cancel).await?,
        };
        self.presence.set_active_game(player.id, Some(game.id)).await;

        // The socket may have closed while we were matching; its disconnect
        // could not see the game yet, so check for it here.
        if cancel.is_cancelled() {
            self.directory
                .purge_if_inactive(game.id, &self.presence)
                .await;
            return Err(RegisterError::Rejected(RejectReason::Disconnected));
        }

        self.directory
            .join_channel(game.id, player.id, connection, sender)
            .await;
        if let Err(e) = self.directory.broadcast_game(game.id).await {
            tracing::debug!(game_id = %game.id, error = %e, "Skipped registration broadcast");
        }

        tracing::info!(
            player_id = %player.id,
            game_id = %game.id,
            phase = ?game.phase(),
            "Player registered"
        );
        Ok(Registration {
            player,
            game,
            cancel,
        })
    }

    async fn resume(
        &self,
        identity: &Identity,
        player: &PlayerInfo,
        cancel: &CancellationToken,
    ) -> Result<Option<Game>, RegisterError> {
        let Some(game_id) = identity.active_game else {
            return Ok(None);
        };
        match self.directory.rejoin(player, game_id, cancel).await {
            Ok(game) => Ok(Some(game)),
            // Only a game that is gone or over frees the player for another.
            Err(reason @ (RejectReason::GameNotFound | RejectReason::GameOver)) => {
                tracing::debug!(
                    player_id = %player.id,
                    game_id = %game_id,
                    %reason,
                    "Previous game unavailable, matchmaking"
                );
                Ok(None)
            },
            Err(reason) => Err(reason.into()),
        }
    }

    async fn matchmake(
        &self,
        player: &PlayerInfo,
        cancel: &CancellationToken,
    ) -> Result<Game, RegisterError> {
        for attempt in 1..=self.matchmaking_attempts {
            let Some(game_id) = self.directory.find_joinable().await else {
                break;
            };
            match self
                .directory
                .join_game(player.clone(), game_id, cancel)
                .await
            {
                Ok(game) => return Ok(game),
                Err(
                    reason @ (RejectReason::GameFull
                    | RejectReason::GameAlreadyStarted
                    | RejectReason::GameBusy
                    | RejectReason::GameNotFound),
                ) => {
                    tracing::debug!(
                        player_id = %player.id,
                        game_id = %game_id,
                        attempt,
                        %reason,
                        "Lost matchmaking race, retrying"
                    );
                },
                Err(reason) => return Err(reason.into()),
            }
        }

        if cancel.is_cancelled() {
            return Err(RejectReason::Disconnected.into());
        }
        Ok(self.directory.create_game(player.clone()).await)
    }

    /// Kick the ball in the player's active game.
    pub async fn submit_move(
        &self,
        player: PlayerId,
        target: Vertex,
    ) -> Result<TurnResult, RejectReason> {
        let game_id = self
            .presence
            .active_game_of(player)
            .await
            .ok_or(RejectReason::GameNotFound)?;
        self.directory.submit_move(game_id, player, target).await
    }

    /// Forget the connection. Game cleanup follows from the
    /// `PlayerDisconnected` event.
    pub async fn disconnect(&self, connection: ConnectionId) -> Option<Identity> {
        let identity = self.presence.unbind(connection).await?;
        tracing::info!(player_id = %identity.id, connection, "Player disconnected");
        Some(identity)
    }

    /// Remove the game if nobody in it is connected any more.
    pub async fn purge_if_inactive(&self, game_id: GameId) -> bool {
        self.directory
            .purge_if_inactive(game_id, &self.presence)
            .await
    }
}
