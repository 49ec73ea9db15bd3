use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable identifier of a player, stable across reconnects.
pub type PlayerId = Uuid;

/// Name given to players who register without one.
pub const DEFAULT_PLAYER_NAME: &str = "Guest";

/// Maximum display name length, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum identity token length, in bytes.
pub const MAX_TOKEN_LEN: usize = 64;

/// A participant as seen by the other players of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
}

impl PlayerInfo {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Trim and check a display name. Returns `None` if it is empty, too long,
/// or contains control characters.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(name.to_string())
}

/// Identity tokens are opaque, but must be non-empty, bounded and printable.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_TOKEN_LEN && !token.chars().any(|c| c.is_control())
}
