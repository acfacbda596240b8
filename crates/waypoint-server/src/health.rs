use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;
use crate::store::PlayerStore;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    pub players: PlayerInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    /// Connections with a registered outbound queue.
    pub registered: usize,
}

#[derive(Serialize)]
pub struct PlayerInfo {
    pub active: usize,
}

/// Structured health check endpoint. Returns server status, connection counts,
/// and the number of active players as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);

    let (registered, active) = {
        let registry = state.registry.read().await;
        registry.stats()
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo {
            websocket: ws,
            registered,
        },
        players: PlayerInfo { active },
    })
}

/// Readiness check: the player store must answer queries.
pub async fn readiness_check(State(state): State<AppState>) -> &'static str {
    let probe = waypoint_core::identity::KeyPair {
        public: String::new(),
        private: String::new(),
    };
    match state.store.key_pair_in_use(&probe) {
        Ok(_) => "ready",
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            "not ready: store unavailable"
        },
    }
}
