use std::collections::HashMap;
use std::net::IpAddr;

use waypoint_core::identity::KeyPair;
use waypoint_core::net::messages::{RemovePlayerMsg, ServerMessage};
use waypoint_core::player::PlayerView;

use crate::error::ServerError;
use crate::fanout::{ConnectionId, ConnectionSender, Fanout};
use crate::player::Player;
use crate::store::{PlayerRecord, PlayerStore};

/// Authoritative set of active players, keyed by public key, together with
/// the delivery table used to notify every connection of changes.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<String, Player>,
    /// Maps connection → public key of the player it admitted.
    bindings: HashMap<ConnectionId, String>,
    fanout: Fanout,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection for delivery.
    pub fn connect(&mut self, sender: ConnectionSender) -> ConnectionId {
        self.fanout.connect(sender)
    }

    /// Forget a connection's outbound queue.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.fanout.disconnect(connection);
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Admit `player` on its connection and announce it to everyone else.
    ///
    /// The player is written to the store first if the store does not know
    /// it; a store failure leaves the registry untouched. An already active
    /// public key is replaced by the newcomer.
    pub fn add(&mut self, player: Player, store: &dyn PlayerStore) -> Result<(), ServerError> {
        ensure_registered(store, &player.record())?;

        let public = player.keys.public.clone();
        let connection = player.connection;
        if let Some(previous) = self.players.get(&public) {
            tracing::warn!(
                player = %public,
                previous_connection = previous.connection,
                connection,
                "Public key already active, replacing previous session"
            );
        }

        let announcement = ServerMessage::AddPlayer(player.view());
        self.players.insert(public.clone(), player);
        self.bindings.insert(connection, public);
        self.fanout.broadcast(&announcement, Some(connection));
        Ok(())
    }

    /// Remove the player admitted on `connection` and announce its departure.
    /// The store is not touched; see [`persist_position`].
    ///
    /// If the public key has since been taken over by another connection the
    /// newer session is left alone.
    pub fn remove(&mut self, connection: ConnectionId) -> Result<Player, ServerError> {
        let public = self.bindings.remove(&connection).ok_or_else(|| {
            ServerError::UnknownPlayer(format!("no player bound to connection {connection}"))
        })?;

        let owned = self
            .players
            .get(&public)
            .is_some_and(|p| p.connection == connection);
        if !owned {
            return Err(ServerError::UnknownPlayer(format!(
                "{public} is no longer owned by connection {connection}"
            )));
        }
        let Some(player) = self.players.remove(&public) else {
            return Err(ServerError::UnknownPlayer(public));
        };

        self.fanout.broadcast(
            &ServerMessage::RemovePlayer(RemovePlayerMsg { player: public }),
            Some(connection),
        );
        Ok(player)
    }

    /// Public key of the player admitted on `connection`, if any.
    pub fn bound_player(&self, connection: ConnectionId) -> Option<&str> {
        self.bindings.get(&connection).map(String::as_str)
    }

    /// Look up the player that `origin` and `keys` prove control of.
    pub fn identify(&self, origin: IpAddr, keys: &KeyPair) -> Option<&Player> {
        self.players
            .get(&keys.public)
            .filter(|p| p.is_authenticated_by(origin, keys))
    }

    pub fn identify_mut(&mut self, origin: IpAddr, keys: &KeyPair) -> Option<&mut Player> {
        self.players
            .get_mut(&keys.public)
            .filter(|p| p.is_authenticated_by(origin, keys))
    }

    /// Public state of every active player except `excluding`.
    pub fn snapshot(&self, excluding: Option<&str>) -> Vec<PlayerView> {
        self.players
            .values()
            .filter(|p| Some(p.public_key()) != excluding)
            .map(Player::view)
            .collect()
    }

    pub fn contains(&self, public: &str) -> bool {
        self.players.contains_key(public)
    }

    /// (open connections, active players)
    pub fn stats(&self) -> (usize, usize) {
        (self.fanout.len(), self.players.len())
    }
}

/// Write `record` to the store unless it already knows the player.
pub fn ensure_registered(
    store: &dyn PlayerStore,
    record: &PlayerRecord,
) -> Result<(), ServerError> {
    if !store.player_exists(record.origin, &record.keys)? {
        store.register_player(record)?;
    }
    Ok(())
}

/// Best-effort write of a departing player's last position.
pub fn persist_position(store: &dyn PlayerStore, player: &Player) {
    if let Err(e) = store.update_position(&player.keys, player.x, player.y) {
        tracing::warn!(player = %player.keys.public, error = %e, "Failed to persist last position");
    }
}
