use serde::{Deserialize, Serialize};

use crate::board::Vertex;
use crate::game::{GameId, GamePhase};
use crate::player::PlayerInfo;
use crate::reject::RejectReason;
use crate::state::GameState;

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    Register = 0x01,
    KickBall = 0x02,

    // Server -> Client
    RegisterResponse = 0x10,
    GameState = 0x11,
    MoveRejected = 0x12,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Register),
            0x02 => Some(Self::KickBall),
            0x10 => Some(Self::RegisterResponse),
            0x11 => Some(Self::GameState),
            0x12 => Some(Self::MoveRejected),
            _ => None,
        }
    }

    /// Messages only the server may send.
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            Self::RegisterResponse | Self::GameState | Self::MoveRejected
        )
    }
}

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMsg {
    /// Opaque token reused across reconnects to recover the same identity.
    pub token: String,
    #[serde(default)]
    pub player_name: Option<String>,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickBallMsg {
    pub target: Vertex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponseMsg {
    pub success: bool,
    pub player: Option<PlayerInfo>,
    pub game_id: Option<GameId>,
    pub error: Option<String>,
}

/// Full snapshot of a game, broadcast after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStateMsg {
    pub game_id: GameId,
    pub phase: GamePhase,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub state: Option<GameState>,
}

/// Sent only to the player whose kick was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRejectedMsg {
    pub target: Vertex,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Register(RegisterMsg),
    KickBall(KickBallMsg),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    RegisterResponse(RegisterResponseMsg),
    GameState(Box<GameStateMsg>),
    MoveRejected(MoveRejectedMsg),
}
