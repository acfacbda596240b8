pub mod config;
pub mod error;
pub mod fanout;
pub mod health;
pub mod identity;
pub mod movement;
pub mod player;
pub mod registry;
pub mod state;
pub mod store;
pub mod ws;

use axum::Router;

use config::ServerConfig;
use state::AppState;
use store::{StoreError, open_store};

/// Build the Axum router and application state from a config.
///
/// The router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` so sessions can be
/// bound to the peer address.
pub fn build_app(config: ServerConfig) -> Result<(Router<()>, AppState), StoreError> {
    let store = open_store(&config.store)?;
    let state = AppState::new(config, store);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .with_state(state.clone());

    Ok((app, state))
}
