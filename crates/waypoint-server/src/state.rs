use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::movement::MovementValidator;
use crate::registry::PlayerRegistry;
use crate::store::SharedStore;

pub type SharedRegistry = Arc<RwLock<PlayerRegistry>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub store: SharedStore,
    pub validator: Arc<MovementValidator>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: SharedStore) -> Self {
        Self {
            registry: Arc::new(RwLock::new(PlayerRegistry::new())),
            store,
            validator: Arc::new(MovementValidator::new(config.movement)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// RAII guard that decrements a connection counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
