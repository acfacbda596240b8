use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use waypoint_core::identity::KeyPair;
use waypoint_core::net::messages::{
    ClientMessage, InitMsg, InitResponseMsg, ServerMessage, SyncGameMsg, VectorMsg,
};
use waypoint_core::net::protocol::{decode_server_message, encode_client_message};

use waypoint_server::build_app;
use waypoint_server::config::ServerConfig;
use waypoint_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with an in-memory ledger.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Wait until the registry holds `count` active players (2s timeout).
    pub async fn wait_for_players(&self, count: usize) {
        let deadline = Duration::from_secs(2);
        tokio::time::timeout(deadline, async {
            loop {
                if self.state.registry.read().await.stats().1 == count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for player count");
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage as a JSON text frame.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

/// Send an arbitrary text frame.
pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream
        .send(Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read a text frame, returning None on timeout.
pub async fn ws_try_read_text(stream: &mut WsStream, timeout_ms: u64) -> Option<String> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Discard everything queued for this client until it stays quiet.
pub async fn ws_drain(stream: &mut WsStream) {
    while ws_try_read_text(stream, 150).await.is_some() {}
}

/// Read the next ServerMessage (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let text = ws_read_text(stream).await;
    decode_server_message(&text).unwrap()
}

/// Wait for the server to close the session (5s timeout). Returns true if
/// the stream ended or a close frame arrived.
pub async fn ws_expect_closed(stream: &mut WsStream) -> bool {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return true,
                Some(Ok(Message::Text(_))) => return false,
                _ => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}

/// Send `init` and return the server's reply.
pub async fn ws_init(
    stream: &mut WsStream,
    keys: Option<KeyPair>,
    generate_new: bool,
) -> InitResponseMsg {
    let msg = ClientMessage::Init(InitMsg { generate_new, keys });
    ws_send_client_msg(stream, &msg).await;

    match ws_read_server_msg(stream).await {
        ServerMessage::Init(init) => init,
        other => panic!("Expected Init, got: {other:?}"),
    }
}

/// Connect and start a fresh session. Returns the stream and its keys.
pub async fn ws_join(server: &TestServer) -> (WsStream, KeyPair) {
    let mut stream = ws_connect(&server.ws_url()).await;
    let init = ws_init(&mut stream, None, true).await;
    (stream, init.keys)
}

pub fn sync_msg(keys: &KeyPair, x: f64, y: f64, dx: f64, dy: f64) -> ClientMessage {
    ClientMessage::SyncGame(SyncGameMsg {
        keys: keys.clone(),
        x,
        y,
        dx,
        dy,
    })
}

pub fn vector_msg(keys: &KeyPair, dx: f64, dy: f64) -> ClientMessage {
    ClientMessage::Vector(VectorMsg {
        keys: keys.clone(),
        dx,
        dy,
        x: None,
        y: None,
    })
}
