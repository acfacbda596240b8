use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use waypoint_core::net::messages::ServerMessage;
use waypoint_core::net::protocol::encode_server_message;

/// Identifier assigned to each accepted WebSocket.
pub type ConnectionId = u64;

/// Per-connection sender for outbound text frames.
/// Bounded so a slow client cannot exhaust memory; `Utf8Bytes` clones are
/// cheap when one frame goes to many connections.
pub type ConnectionSender = mpsc::Sender<Utf8Bytes>;

/// Delivery table for every open connection, whether or not it has
/// completed `init`.
#[derive(Default)]
pub struct Fanout {
    connections: HashMap<ConnectionId, ConnectionSender>,
    next_id: ConnectionId,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound queue and return its connection id.
    pub fn connect(&mut self, sender: ConnectionSender) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        self.connections.insert(id, sender);
        id
    }

    /// Drop the outbound queue. Returns false if it was already gone.
    pub fn disconnect(&mut self, connection: ConnectionId) -> bool {
        self.connections.remove(&connection).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue `msg` for a single connection. Returns whether it was queued.
    pub fn unicast(&self, msg: &ServerMessage, connection: ConnectionId) -> bool {
        let Some(frame) = encode(msg) else {
            return false;
        };
        let Some(sender) = self.connections.get(&connection) else {
            tracing::debug!(connection, event = msg.event_name(), "Unicast to unknown connection");
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    connection, event = msg.event_name(), error = %e,
                    "Skipping unicast to slow client"
                );
                false
            },
        }
    }

    /// Queue `msg` for every connection except `excluded`. A full or closed
    /// queue only skips that recipient. Returns the number of connections
    /// the frame was queued for.
    pub fn broadcast(&self, msg: &ServerMessage, excluded: Option<ConnectionId>) -> usize {
        let Some(frame) = encode(msg) else {
            return 0;
        };
        let mut delivered = 0;
        for (&connection, sender) in &self.connections {
            if Some(connection) == excluded {
                continue;
            }
            if let Err(e) = sender.try_send(frame.clone()) {
                tracing::debug!(
                    connection, event = msg.event_name(), error = %e,
                    "Skipping broadcast to slow client"
                );
                continue;
            }
            delivered += 1;
        }
        delivered
    }
}

fn encode(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match encode_server_message(msg) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            tracing::warn!(event = msg.event_name(), error = %e, "Failed to encode message");
            None
        },
    }
}
