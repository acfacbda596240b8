use serde::{Deserialize, Serialize};

/// Public-facing state of an active player, as sent to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Public key of the player.
    pub player: String,
    pub name: String,
    /// Unix time (seconds) of the player's last velocity report.
    pub last_vector: f64,
    pub dx: f64,
    pub dy: f64,
    pub x: f64,
    pub y: f64,
}
