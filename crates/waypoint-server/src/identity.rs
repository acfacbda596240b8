use std::net::IpAddr;

use waypoint_core::identity::KeyPair;

use crate::error::ServerError;
use crate::store::PlayerStore;

/// Resolve the identity a connecting client should use.
///
/// A supplied pair that the store already knows for `origin` is resumed
/// unless `force_new` is set. Otherwise a fresh pair is generated, retrying
/// until the store confirms neither token is taken.
pub fn resolve_or_issue(
    store: &dyn PlayerStore,
    origin: IpAddr,
    supplied: Option<&KeyPair>,
    force_new: bool,
) -> Result<KeyPair, ServerError> {
    if !force_new
        && let Some(keys) = supplied
        && store.player_exists(origin, keys)?
    {
        tracing::debug!(%origin, "Resuming existing identity");
        return Ok(keys.clone());
    }

    loop {
        let candidate = KeyPair::generate();
        if !store.key_pair_in_use(&candidate)? {
            return Ok(candidate);
        }
        tracing::debug!(%origin, "Generated key pair collided, retrying");
    }
}
