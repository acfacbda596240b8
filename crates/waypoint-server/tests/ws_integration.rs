#[allow(dead_code)]
mod common;

use std::time::Duration;

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;

use waypoint_core::identity::KeyPair;
use waypoint_core::net::messages::ServerMessage;
use waypoint_server::config::{MovementConfig, ServerConfig, StoreConfig};

use common::{
    TestServer, sync_msg, vector_msg, ws_connect, ws_drain, ws_expect_closed, ws_init, ws_join,
    ws_read_server_msg, ws_send_client_msg, ws_send_text, ws_try_read_text,
};

#[tokio::test]
async fn first_player_gets_fresh_keys_and_no_peers() {
    let server = TestServer::new().await;
    let mut a = ws_connect(&server.ws_url()).await;

    let init = ws_init(&mut a, None, false).await;
    assert_eq!(init.keys.public.len(), 24);
    assert_eq!(init.keys.private.len(), 24);
    assert_ne!(init.keys.public, init.keys.private);
    assert_eq!(init.ip, "127.0.0.1");
    assert!(init.name.is_empty());

    assert!(ws_try_read_text(&mut a, 200).await.is_none());
}

#[tokio::test]
async fn second_player_learns_about_first_and_first_is_told() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;

    let mut b = ws_connect(&server.ws_url()).await;
    let b_init = ws_init(&mut b, None, false).await;
    assert_ne!(b_init.keys, a_keys);

    match ws_read_server_msg(&mut b).await {
        ServerMessage::AddPlayer(view) => {
            assert_eq!(view.player, a_keys.public);
            assert_eq!((view.x, view.y), (0.0, 0.0));
        },
        other => panic!("Expected AddPlayer(A), got: {other:?}"),
    }

    match ws_read_server_msg(&mut a).await {
        ServerMessage::AddPlayer(view) => assert_eq!(view.player, b_init.keys.public),
        other => panic!("Expected AddPlayer(B), got: {other:?}"),
    }

    // Neither side hears about itself
    assert!(ws_try_read_text(&mut a, 200).await.is_none());
    assert!(ws_try_read_text(&mut b, 200).await.is_none());
}

#[tokio::test]
async fn sync_replies_with_other_players_only() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, b_keys) = ws_join(&server).await;
    ws_drain(&mut a).await;
    ws_drain(&mut b).await;

    ws_send_client_msg(&mut a, &sync_msg(&a_keys, 0.0, 0.0, 0.0, 0.0)).await;
    match ws_read_server_msg(&mut a).await {
        ServerMessage::SyncGame(state) => {
            assert_eq!(state.players.len(), 1);
            assert_eq!(state.players[0].player, b_keys.public);
        },
        other => panic!("Expected SyncGame, got: {other:?}"),
    }

    // Sync is a reply, not a broadcast
    assert!(ws_try_read_text(&mut b, 200).await.is_none());
}

#[tokio::test]
async fn vector_change_reaches_everyone_but_the_sender() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, _) = ws_join(&server).await;
    let (mut c, _) = ws_join(&server).await;
    for stream in [&mut a, &mut b, &mut c] {
        ws_drain(stream).await;
    }

    ws_send_client_msg(&mut a, &vector_msg(&a_keys, 1.5, 0.0)).await;

    for stream in [&mut b, &mut c] {
        match ws_read_server_msg(stream).await {
            ServerMessage::PlayerVectorChange(change) => {
                assert_eq!(change.player, a_keys.public);
                assert_eq!(change.dx, 1.5);
                assert_eq!(change.dy, 0.0);
            },
            other => panic!("Expected PlayerVectorChange, got: {other:?}"),
        }
    }

    // The sender only gets its sync reply
    match ws_read_server_msg(&mut a).await {
        ServerMessage::SyncGame(state) => {
            assert_eq!(state.players.len(), 2);
            assert!(state.players.iter().all(|p| p.player != a_keys.public));
        },
        other => panic!("Expected SyncGame, got: {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_announces_removal() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, _) = ws_join(&server).await;
    ws_drain(&mut b).await;

    a.send(Message::Close(None)).await.unwrap();

    match ws_read_server_msg(&mut b).await {
        ServerMessage::RemovePlayer(msg) => assert_eq!(msg.player, a_keys.public),
        other => panic!("Expected RemovePlayer, got: {other:?}"),
    }
    server.wait_for_players(1).await;
}

#[tokio::test]
async fn malformed_json_closes_the_session() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, _) = ws_join(&server).await;
    ws_drain(&mut a).await;
    ws_drain(&mut b).await;

    ws_send_text(&mut a, "{not json").await;
    assert!(ws_expect_closed(&mut a).await);

    match ws_read_server_msg(&mut b).await {
        ServerMessage::RemovePlayer(msg) => assert_eq!(msg.player, a_keys.public),
        other => panic!("Expected RemovePlayer, got: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_event_closes_the_session() {
    let server = TestServer::new().await;
    let (mut a, _) = ws_join(&server).await;

    ws_send_text(&mut a, r#"{"event":"teleport","x":1000}"#).await;
    assert!(ws_expect_closed(&mut a).await);
    server.wait_for_players(0).await;
}

#[tokio::test]
async fn missing_field_closes_the_session() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;

    let text = format!(
        r#"{{"event":"sync_game","keys":{{"public":"{}","private":"{}"}},"x":1.0}}"#,
        a_keys.public, a_keys.private
    );
    ws_send_text(&mut a, &text).await;
    assert!(ws_expect_closed(&mut a).await);
}

#[tokio::test]
async fn binary_frame_closes_the_session() {
    let server = TestServer::new().await;
    let (mut a, _) = ws_join(&server).await;

    a.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
    assert!(ws_expect_closed(&mut a).await);
}

#[tokio::test]
async fn forged_keys_are_ignored() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    ws_drain(&mut a).await;

    let mut intruder = ws_connect(&server.ws_url()).await;
    let forged = KeyPair {
        public: a_keys.public.clone(),
        private: "0".repeat(24),
    };
    ws_send_client_msg(&mut intruder, &vector_msg(&forged, 1.5, 1.5)).await;
    ws_send_client_msg(&mut intruder, &sync_msg(&forged, 50.0, 50.0, 0.0, 0.0)).await;

    assert!(ws_try_read_text(&mut intruder, 300).await.is_none());
    assert!(ws_try_read_text(&mut a, 100).await.is_none());

    // The connection stays usable
    let init = ws_init(&mut intruder, None, false).await;
    assert_ne!(init.keys, a_keys);
}

#[tokio::test]
async fn known_keys_resume_the_same_identity() {
    let server = TestServer::new().await;
    let (mut a, keys) = ws_join(&server).await;
    a.send(Message::Close(None)).await.unwrap();
    server.wait_for_players(0).await;

    let mut again = ws_connect(&server.ws_url()).await;
    let init = ws_init(&mut again, Some(keys.clone()), false).await;
    assert_eq!(init.keys, keys);
}

#[tokio::test]
async fn generate_new_discards_known_keys() {
    let server = TestServer::new().await;
    let (mut a, keys) = ws_join(&server).await;
    a.send(Message::Close(None)).await.unwrap();
    server.wait_for_players(0).await;

    let mut again = ws_connect(&server.ws_url()).await;
    let init = ws_init(&mut again, Some(keys.clone()), true).await;
    assert_ne!(init.keys, keys);
}

#[tokio::test]
async fn unknown_keys_are_replaced() {
    let server = TestServer::new().await;
    let mut a = ws_connect(&server.ws_url()).await;
    let made_up = KeyPair::generate();
    let init = ws_init(&mut a, Some(made_up.clone()), false).await;
    assert_ne!(init.keys, made_up);
}

#[tokio::test]
async fn reinit_replaces_the_previous_session() {
    let server = TestServer::new().await;
    let (mut a, old_keys) = ws_join(&server).await;
    let (mut b, _) = ws_join(&server).await;
    ws_drain(&mut a).await;
    ws_drain(&mut b).await;

    let init = ws_init(&mut a, None, true).await;
    assert_ne!(init.keys, old_keys);

    match ws_read_server_msg(&mut b).await {
        ServerMessage::RemovePlayer(msg) => assert_eq!(msg.player, old_keys.public),
        other => panic!("Expected RemovePlayer, got: {other:?}"),
    }
    match ws_read_server_msg(&mut b).await {
        ServerMessage::AddPlayer(view) => assert_eq!(view.player, init.keys.public),
        other => panic!("Expected AddPlayer, got: {other:?}"),
    }
    server.wait_for_players(2).await;
}

#[tokio::test]
async fn sync_outside_the_window_keeps_the_old_position() {
    let server = TestServer::new().await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, b_keys) = ws_join(&server).await;
    let _ = ws_read_server_msg(&mut a).await; // AddPlayer(B)
    let _ = ws_read_server_msg(&mut b).await; // AddPlayer(A)

    // Far too early for the heartbeat window
    ws_send_client_msg(&mut a, &sync_msg(&a_keys, 1.0, 0.0, 1.5, 0.0)).await;
    let _ = ws_read_server_msg(&mut a).await;

    ws_send_client_msg(&mut b, &sync_msg(&b_keys, 0.0, 0.0, 0.0, 0.0)).await;
    match ws_read_server_msg(&mut b).await {
        ServerMessage::SyncGame(state) => {
            let seen = &state.players[0];
            assert_eq!(seen.player, a_keys.public);
            assert_eq!((seen.x, seen.y), (0.0, 0.0));
            // Velocity is recorded even when the position is not
            assert_eq!(seen.dx, 1.5);
        },
        other => panic!("Expected SyncGame, got: {other:?}"),
    }
}

#[tokio::test]
async fn sync_inside_a_wide_window_is_accepted() {
    let config = ServerConfig {
        movement: MovementConfig {
            sync_window_min: 0.0,
            sync_window_max: 10.0,
            responsive_tenths: 100,
            ..MovementConfig::default()
        },
        ..ServerConfig::default()
    };
    let server = TestServer::from_config(config).await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, b_keys) = ws_join(&server).await;
    let _ = ws_read_server_msg(&mut a).await; // AddPlayer(B)
    let _ = ws_read_server_msg(&mut b).await; // AddPlayer(A)

    tokio::time::sleep(Duration::from_millis(50)).await;
    ws_send_client_msg(&mut a, &sync_msg(&a_keys, 1.0, -1.0, 1.5, -1.5)).await;
    let _ = ws_read_server_msg(&mut a).await;

    ws_send_client_msg(&mut b, &sync_msg(&b_keys, 0.0, 0.0, 0.0, 0.0)).await;
    match ws_read_server_msg(&mut b).await {
        ServerMessage::SyncGame(state) => {
            let seen = &state.players[0];
            assert_eq!((seen.x, seen.y), (1.0, -1.0));
            assert_eq!((seen.dx, seen.dy), (1.5, -1.5));
        },
        other => panic!("Expected SyncGame, got: {other:?}"),
    }
}

#[tokio::test]
async fn time_spent_waiting_for_the_registry_counts_toward_elapsed() {
    let config = ServerConfig {
        movement: MovementConfig {
            sync_window_min: 0.3,
            sync_window_max: 10.0,
            responsive_tenths: 100,
            ..MovementConfig::default()
        },
        ..ServerConfig::default()
    };
    let server = TestServer::from_config(config).await;
    let (mut a, a_keys) = ws_join(&server).await;
    let (mut b, b_keys) = ws_join(&server).await;
    let _ = ws_read_server_msg(&mut a).await; // AddPlayer(B)
    let _ = ws_read_server_msg(&mut b).await; // AddPlayer(A)

    // A's heartbeat arrives well inside 0.3s but waits on the lock past it
    let held = server.state.registry.write().await;
    ws_send_client_msg(&mut a, &sync_msg(&a_keys, 1.0, 0.0, 1.5, 0.0)).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    drop(held);
    let _ = ws_read_server_msg(&mut a).await;

    ws_send_client_msg(&mut b, &sync_msg(&b_keys, 0.0, 0.0, 0.0, 0.0)).await;
    match ws_read_server_msg(&mut b).await {
        ServerMessage::SyncGame(state) => assert_eq!(state.players[0].x, 1.0),
        other => panic!("Expected SyncGame, got: {other:?}"),
    }
}

#[tokio::test]
async fn file_ledger_resumes_identity_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("players.json");
    let config = ServerConfig {
        store: StoreConfig {
            path: Some(path.to_string_lossy().into_owned()),
            secret: Some("integration".into()),
        },
        ..ServerConfig::default()
    };

    let first = TestServer::from_config(config.clone()).await;
    let (mut a, keys) = ws_join(&first).await;
    a.send(Message::Close(None)).await.unwrap();
    first.wait_for_players(0).await;
    assert!(path.exists());

    let second = TestServer::from_config(config).await;
    let mut again = ws_connect(&second.ws_url()).await;
    let init = ws_init(&mut again, Some(keys.clone()), false).await;
    assert_eq!(init.keys, keys);

    let ledger = std::fs::read_to_string(&path).unwrap();
    assert!(!ledger.contains(&keys.private));
}
