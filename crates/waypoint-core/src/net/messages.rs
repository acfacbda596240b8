use serde::{Deserialize, Serialize};

use crate::identity::KeyPair;
use crate::player::PlayerView;

// ============================================================================
// Client -> Server
// ============================================================================

/// Messages sent by a client. The `event` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    Init(InitMsg),
    Vector(VectorMsg),
    SyncGame(SyncGameMsg),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Vector(_) => "vector",
            Self::SyncGame(_) => "sync_game",
        }
    }
}

/// Session start. Resumes `keys` unless `generate_new` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMsg {
    pub generate_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeyPair>,
}

/// Velocity change. Position is optional; when absent the server validates
/// against the player's current position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMsg {
    pub keys: KeyPair,
    pub dx: f64,
    pub dy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// Fixed-cadence full position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncGameMsg {
    pub keys: KeyPair,
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Messages sent by the server. The `event` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage {
    Init(InitResponseMsg),
    AddPlayer(PlayerView),
    RemovePlayer(RemovePlayerMsg),
    PlayerVectorChange(PlayerVectorChangeMsg),
    SyncGame(GameStateMsg),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::AddPlayer(_) => "add_player",
            Self::RemovePlayer(_) => "remove_player",
            Self::PlayerVectorChange(_) => "player_vector_change",
            Self::SyncGame(_) => "sync_game",
        }
    }
}

/// Reply to `init`, carrying the (possibly new) session keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponseMsg {
    pub name: String,
    pub ip: String,
    pub keys: KeyPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePlayerMsg {
    pub player: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerVectorChangeMsg {
    pub player: String,
    pub dx: f64,
    pub dy: f64,
}

/// Reply to a sync: every other active player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateMsg {
    pub players: Vec<PlayerView>,
}
