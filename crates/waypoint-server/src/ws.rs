use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::extract::FromRequest;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use waypoint_core::identity::KeyPair;
use waypoint_core::net::messages::{
    ClientMessage, GameStateMsg, InitMsg, InitResponseMsg, PlayerVectorChangeMsg, ServerMessage,
    SyncGameMsg, VectorMsg,
};
use waypoint_core::net::protocol::decode_client_message;
use waypoint_core::time::unix_seconds_now;

use crate::error::ServerError;
use crate::fanout::ConnectionId;
use crate::identity::resolve_or_issue;
use crate::movement::{MovementReport, SyncMode};
use crate::player::Player;
use crate::registry::{PlayerRegistry, ensure_registered, persist_position};
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let origin = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let max_message_size = state.config.limits.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, origin))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, origin: IpAddr) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Utf8Bytes>(state.config.limits.player_message_buffer);
    let connection = state.registry.write().await.connect(tx);
    spawn_writer(ws_sender, rx);

    tracing::info!(connection, %origin, "Connection opened");

    read_loop(&mut ws_receiver, &state, connection, origin).await;

    // Single cleanup path for every way a session can end
    let departed = {
        let mut registry = state.registry.write().await;
        let departed = registry.remove(connection);
        registry.disconnect(connection);
        departed
    };
    match departed {
        Ok(player) => {
            tracing::info!(connection, %origin, player = %player.keys.public, "Player left");
            persist_last_position(&state, player).await;
        },
        Err(e) => {
            tracing::debug!(connection, %origin, error = %e, "No player to remove");
        },
    }

    tracing::info!(connection, %origin, "Connection closed");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Utf8Bytes>,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    connection: ConnectionId,
    origin: IpAddr,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                tracing::info!(connection, %origin, "Binary frame received, closing session");
                break;
            },
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection, %origin, error = %e, "Transport error");
                break;
            },
        };

        // Rate limit: drop messages that exceed per-connection rate
        if !rate_limiter.allow() {
            tracing::warn!(connection, %origin, "Rate limited");
            continue;
        }

        if let Err(e) = dispatch(state, connection, origin, text.as_str()).await {
            tracing::info!(connection, %origin, error = %e, "Closing session");
            break;
        }
    }
}

/// Decode one text frame and run its handler. An error ends the session.
async fn dispatch(
    state: &AppState,
    connection: ConnectionId,
    origin: IpAddr,
    text: &str,
) -> Result<(), ServerError> {
    match decode_client_message(text)? {
        ClientMessage::Init(init) => handle_init(state, connection, origin, init).await,
        ClientMessage::Vector(vector) => {
            handle_vector(state, connection, origin, vector).await;
            Ok(())
        },
        ClientMessage::SyncGame(sync) => {
            handle_sync(state, connection, origin, sync).await;
            Ok(())
        },
    }
}

async fn handle_init(
    state: &AppState,
    connection: ConnectionId,
    origin: IpAddr,
    init: InitMsg,
) -> Result<(), ServerError> {
    let keys = resolve_and_register(state, connection, origin, init).await?;

    let (previous, admitted) = {
        let mut registry = state.registry.write().await;

        // Re-init on the same connection replaces the earlier session
        let previous = if registry.bound_player(connection).is_some() {
            registry
                .remove(connection)
                .inspect_err(|e| {
                    tracing::debug!(connection, error = %e, "Previous session already gone");
                })
                .ok()
        } else {
            None
        };
        let admitted = admit(&mut registry, state, connection, origin, &keys);
        (previous, admitted)
    };

    if let Some(player) = previous {
        persist_last_position(state, player).await;
    }
    admitted?;

    tracing::info!(connection, %origin, player = %keys.public, "Player joined");
    Ok(())
}

/// Resolve the session keys and make sure the store knows the player, off
/// the async workers.
async fn resolve_and_register(
    state: &AppState,
    connection: ConnectionId,
    origin: IpAddr,
    init: InitMsg,
) -> Result<KeyPair, ServerError> {
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || -> Result<KeyPair, ServerError> {
        let keys = resolve_or_issue(
            store.as_ref(),
            origin,
            init.keys.as_ref(),
            init.generate_new,
        )?;
        let record = Player::new(keys.clone(), origin, connection).record();
        ensure_registered(store.as_ref(), &record)?;
        Ok(keys)
    })
    .await
    .map_err(|e| ServerError::StorageUnavailable(format!("store task failed: {e}")))?
}

/// Add the player and queue its init reply followed by every other player.
fn admit(
    registry: &mut PlayerRegistry,
    state: &AppState,
    connection: ConnectionId,
    origin: IpAddr,
    keys: &KeyPair,
) -> Result<(), ServerError> {
    let player = Player::new(keys.clone(), origin, connection);
    let name = player.display_name.clone();
    registry.add(player, state.store.as_ref())?;

    let fanout = registry.fanout();
    let reply = ServerMessage::Init(InitResponseMsg {
        name,
        ip: origin.to_string(),
        keys: keys.clone(),
    });
    if !fanout.unicast(&reply, connection) {
        return Err(ServerError::Delivery(format!(
            "init reply to connection {connection}"
        )));
    }
    for view in registry.snapshot(Some(&keys.public)) {
        if !fanout.unicast(&ServerMessage::AddPlayer(view), connection) {
            return Err(ServerError::Delivery(format!(
                "player list to connection {connection}"
            )));
        }
    }
    Ok(())
}

/// Best-effort write of a departed player's position, off the async workers.
async fn persist_last_position(state: &AppState, player: Player) {
    let store = Arc::clone(&state.store);
    let write = tokio::task::spawn_blocking(move || persist_position(store.as_ref(), &player));
    if let Err(e) = write.await {
        tracing::warn!(error = %e, "Position write task failed");
    }
}

async fn handle_vector(state: &AppState, connection: ConnectionId, origin: IpAddr, msg: VectorMsg) {
    let mut registry = state.registry.write().await;
    let now = Instant::now();
    let Some(player) = registry.identify_mut(origin, &msg.keys) else {
        tracing::debug!(connection, %origin, "Ignoring vector from unauthenticated client");
        return;
    };

    player.last_vector = unix_seconds_now();
    let report = MovementReport {
        x: msg.x.unwrap_or(player.x),
        y: msg.y.unwrap_or(player.y),
        dx: msg.dx,
        dy: msg.dy,
    };
    state.validator.refresh_responsiveness(player, now);
    let accepted = state
        .validator
        .evaluate(player, report, SyncMode::Asynchronous, now);
    let public = player.keys.public.clone();
    if !accepted {
        tracing::debug!(connection, player = %public, "Rejected asynchronous update");
    }

    registry.fanout().broadcast(
        &ServerMessage::PlayerVectorChange(PlayerVectorChangeMsg {
            player: public.clone(),
            dx: msg.dx,
            dy: msg.dy,
        }),
        Some(connection),
    );
    reply_with_snapshot(&registry, &public, connection);
}

async fn handle_sync(state: &AppState, connection: ConnectionId, origin: IpAddr, msg: SyncGameMsg) {
    let mut registry = state.registry.write().await;
    let now = Instant::now();
    let Some(player) = registry.identify_mut(origin, &msg.keys) else {
        tracing::debug!(connection, %origin, "Ignoring sync from unauthenticated client");
        return;
    };

    let report = MovementReport {
        x: msg.x,
        y: msg.y,
        dx: msg.dx,
        dy: msg.dy,
    };
    state.validator.refresh_responsiveness(player, now);
    let accepted = state
        .validator
        .evaluate(player, report, SyncMode::Synchronous, now);
    let public = player.keys.public.clone();
    if !accepted {
        tracing::debug!(connection, player = %public, "Rejected synchronous update");
    }

    reply_with_snapshot(&registry, &public, connection);
}

/// Send the requester every other active player.
fn reply_with_snapshot(registry: &PlayerRegistry, public: &str, connection: ConnectionId) {
    let players = registry.snapshot(Some(public));
    registry
        .fanout()
        .unicast(&ServerMessage::SyncGame(GameStateMsg { players }), connection);
}
