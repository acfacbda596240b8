use std::net::IpAddr;
use std::time::Instant;

use waypoint_core::identity::KeyPair;
use waypoint_core::player::PlayerView;

use crate::fanout::ConnectionId;
use crate::store::PlayerRecord;

/// A connected participant: identity plus authoritative kinematic state.
#[derive(Debug, Clone)]
pub struct Player {
    pub keys: KeyPair,
    /// Address the identity is bound to.
    pub origin: IpAddr,
    /// Connection currently owning this player.
    pub connection: ConnectionId,
    pub display_name: String,
    pub x: f64,
    pub y: f64,
    /// Last position accepted by the movement validator.
    pub lx: f64,
    pub ly: f64,
    pub dx: f64,
    pub dy: f64,
    /// Anchor of the current validation window.
    pub last_response: Instant,
    /// Unix seconds of the last velocity report.
    pub last_vector: f64,
    pub responsive: bool,
}

impl Player {
    pub fn new(keys: KeyPair, origin: IpAddr, connection: ConnectionId) -> Self {
        Self {
            keys,
            origin,
            connection,
            display_name: String::new(),
            x: 0.0,
            y: 0.0,
            lx: 0.0,
            ly: 0.0,
            dx: 0.0,
            dy: 0.0,
            last_response: Instant::now(),
            last_vector: waypoint_core::time::unix_seconds_now(),
            responsive: true,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.keys.public
    }

    /// True if `keys` and `origin` prove control of this identity.
    pub fn is_authenticated_by(&self, origin: IpAddr, keys: &KeyPair) -> bool {
        self.origin == origin && self.keys.private == keys.private && self.keys.public == keys.public
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            player: self.keys.public.clone(),
            name: self.display_name.clone(),
            last_vector: self.last_vector,
            dx: self.dx,
            dy: self.dy,
            x: self.x,
            y: self.y,
        }
    }

    pub fn record(&self) -> PlayerRecord {
        PlayerRecord {
            origin: self.origin,
            keys: self.keys.clone(),
            name: self.display_name.clone(),
            x: self.x,
            y: self.y,
        }
    }
}
