//! Protocol orchestration between connection events and the player registry
//!
//! [`SyncServer`] is transport-agnostic: each connection is represented only
//! by the outbound channel its writer task drains. Every inbound intent is
//! matched in [`SyncServer::handle_message`], which drives the per-connection
//! state machine and fans the resulting diffs out to the other connections.

use crate::registry::{PlayerRegistry, RegistryError};
use log::{debug, error, info, warn};
use shared::{
    Appearance, ClientMessage, ConnectionId, Direction, Hat, PlayerState, ServerMessage,
};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Lifecycle of a connection as seen by the sync layer
///
/// A terminated connection is simply absent from the connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport is up but no join intent has been accepted yet
    Connected,
    /// The connection owns a registry entry
    Active,
}

struct Connection {
    phase: ConnectionPhase,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

/// Server-side state sync for one plaza
///
/// Owns the [`PlayerRegistry`] and the outbox of every live connection.
/// Each inbound intent is applied to the registry first and then relayed:
///
/// - `join` sends the joiner a snapshot of everyone else and announces the
///   joiner to the rest
/// - `move` goes to everyone except the mover
/// - `emoji` goes to everyone, the sender included
///
/// A connection whose outbox has closed is disconnected on the next send.
pub struct SyncServer {
    registry: PlayerRegistry,
    connections: HashMap<ConnectionId, Connection>,
}

impl SyncServer {
    pub fn new(registry: PlayerRegistry) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn phase(&self, id: ConnectionId) -> Option<ConnectionPhase> {
        self.connections.get(&id).map(|conn| conn.phase)
    }

    /// Registers a freshly accepted connection and tells it its id
    ///
    /// Returns false if the id is already live; the existing connection is
    /// kept and the new outbox is dropped.
    pub fn connect(
        &mut self,
        id: ConnectionId,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        if self.connections.contains_key(&id) {
            error!("Connection id {} is already live, rejecting", id);
            return false;
        }

        self.connections.insert(
            id,
            Connection {
                phase: ConnectionPhase::Connected,
                outbox,
            },
        );
        info!("Connection {} opened ({} live)", id, self.connections.len());

        self.send_to(id, ServerMessage::Connected { id });
        true
    }

    /// Decodes a text frame and dispatches it
    ///
    /// Frames that do not decode into a known intent are dropped with a
    /// warning; the connection stays open.
    pub fn handle_text(&mut self, id: ConnectionId, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(id, message),
            Err(e) => warn!("Dropping message from connection {}: {}", id, e),
        }
    }

    pub fn handle_message(&mut self, id: ConnectionId, message: ClientMessage) {
        let Some(phase) = self.phase(id) else {
            debug!("Dropping message from terminated connection {}", id);
            return;
        };

        match message {
            ClientMessage::Join { hat } => self.handle_join(id, phase, &hat),
            ClientMessage::Move { x, y, direction } => self.handle_move(id, x, y, direction),
            ClientMessage::Emoji { emoji } => self.handle_emoji(id, emoji),
        }
    }

    /// Activates a connection, or refreshes its hat if it already joined
    ///
    /// An unknown hat falls back to [`Hat::None`]. A repeated join keeps the
    /// player's position and only replaces the appearance.
    fn handle_join(&mut self, id: ConnectionId, phase: ConnectionPhase, hat_tag: &str) {
        let hat = Hat::from_tag(hat_tag).unwrap_or_else(|| {
            warn!(
                "Connection {} asked for unknown hat {:?}, using none",
                id, hat_tag
            );
            Hat::None
        });
        let appearance = Appearance { hat };

        if phase == ConnectionPhase::Active {
            if let Some(player) = self.registry.update_appearance(id, appearance) {
                debug!("Player {} rejoined, refreshed hat to {}", id, hat);
                let snapshot = self.snapshot_for(id);
                self.send_to(id, snapshot);
                if self.phase(id).is_some() {
                    self.broadcast(ServerMessage::PlayerJoined(player), Some(id));
                }
            }
            return;
        }

        let player = match self.registry.add_player(id, appearance) {
            Ok(player) => player,
            Err(RegistryError::DuplicateId(dup)) => {
                error!("Rejected join from connection {}: player {} already exists", id, dup);
                return;
            }
        };

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.phase = ConnectionPhase::Active;
        }
        info!("Player {} joined ({} players)", id, self.registry.count());

        let snapshot = self.snapshot_for(id);
        self.send_to(id, snapshot);
        // The joiner may have been reaped while sending its snapshot.
        if self.phase(id).is_none() {
            return;
        }
        self.broadcast(ServerMessage::PlayerJoined(player), Some(id));
    }

    /// Records a reported position and relays it to everyone but the mover
    ///
    /// Coordinates that overflowed `f32` while decoding are dropped; they would
    /// encode as `null` and poison every later snapshot.
    fn handle_move(&mut self, id: ConnectionId, x: f32, y: f32, direction: Direction) {
        if !x.is_finite() || !y.is_finite() {
            warn!("Dropping move from connection {}: non-finite position ({}, {})", id, x, y);
            return;
        }

        if !self.registry.update_position(id, x, y, direction) {
            return;
        }

        self.broadcast(ServerMessage::PlayerMoved { id, x, y, direction }, Some(id));
    }

    /// Stamps the emoji with the current time and echoes it to every connection
    fn handle_emoji(&mut self, id: ConnectionId, emoji: String) {
        if !self.registry.update_emoji(id, &emoji) {
            return;
        }

        debug!("Player {} sent {}", id, emoji);
        self.broadcast(ServerMessage::PlayerEmoji { id, emoji }, None);
    }

    /// Tears down a connection and announces the departure
    ///
    /// Safe to call more than once for the same id.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if self.connections.remove(&id).is_none() {
            return;
        }

        match self.registry.remove_player(id) {
            Some(_) => {
                info!("Player {} left ({} players)", id, self.registry.count());
                self.broadcast(ServerMessage::PlayerLeft { id }, None);
            }
            None => info!("Connection {} closed before joining", id),
        }
    }

    /// Registry contents minus the given player, in join order
    fn snapshot_for(&self, id: ConnectionId) -> ServerMessage {
        let players: Vec<PlayerState> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|player| player.id != id)
            .collect();
        ServerMessage::StateSnapshot { players }
    }

    fn send_to(&mut self, id: ConnectionId, message: ServerMessage) {
        let failed = match self.connections.get(&id) {
            Some(conn) => conn.outbox.send(message).is_err(),
            None => false,
        };

        if failed {
            self.reap(vec![id]);
        }
    }

    /// Sends to every live connection except `exclude`
    fn broadcast(&mut self, message: ServerMessage, exclude: Option<ConnectionId>) {
        let mut dead = Vec::new();

        for (conn_id, conn) in &self.connections {
            if Some(*conn_id) == exclude {
                continue;
            }

            if conn.outbox.send(message.clone()).is_err() {
                dead.push(*conn_id);
            }
        }

        self.reap(dead);
    }

    fn reap(&mut self, dead: Vec<ConnectionId>) {
        for id in dead {
            warn!("Outbound channel for connection {} is closed, cleaning up", id);
            self.disconnect(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Position;

    fn test_server() -> SyncServer {
        SyncServer::new(PlayerRegistry::with_seed(0.0, 1))
    }

    fn open(
        server: &mut SyncServer,
        id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(server.connect(id, tx));
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn join(hat: &str) -> ClientMessage {
        ClientMessage::Join {
            hat: hat.to_string(),
        }
    }

    #[test]
    fn test_connect_sends_id() {
        let mut server = test_server();
        let mut rx = open(&mut server, 4);

        assert_eq!(drain(&mut rx), vec![ServerMessage::Connected { id: 4 }]);
        assert_eq!(server.phase(4), Some(ConnectionPhase::Connected));
        assert_eq!(server.registry().count(), 0);
    }

    #[test]
    fn test_connect_duplicate_id_rejected() {
        let mut server = test_server();
        let _rx = open(&mut server, 1);

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(!server.connect(1, tx));
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn test_join_activates_connection() {
        let mut server = test_server();
        let mut rx = open(&mut server, 1);
        drain(&mut rx);

        server.handle_message(1, join("party"));

        assert_eq!(server.phase(1), Some(ConnectionPhase::Active));
        assert_eq!(server.registry().count(), 1);
        assert_eq!(server.registry().get(1).unwrap().appearance.hat, Hat::Party);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::StateSnapshot { players: vec![] }]
        );
    }

    #[test]
    fn test_join_with_unknown_hat_falls_back() {
        let mut server = test_server();
        let _rx = open(&mut server, 1);

        server.handle_message(1, join("tiara"));

        assert_eq!(server.registry().get(1).unwrap().appearance.hat, Hat::None);
    }

    #[test]
    fn test_second_join_refreshes_appearance() {
        let mut server = test_server();
        let mut a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("party"));
        server.handle_message(2, join("egg"));
        drain(&mut a);
        drain(&mut b);

        server.handle_message(1, join("santa"));

        assert_eq!(server.registry().count(), 2);
        assert_eq!(server.registry().get(1).unwrap().appearance.hat, Hat::Santa);

        match drain(&mut a).as_slice() {
            [ServerMessage::StateSnapshot { players }] => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, 2);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        match drain(&mut b).as_slice() {
            [ServerMessage::PlayerJoined(player)] => {
                assert_eq!(player.id, 1);
                assert_eq!(player.appearance.hat, Hat::Santa);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_move_before_join_is_ignored() {
        let mut server = test_server();
        let mut a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(2, join("none"));
        drain(&mut a);
        drain(&mut b);

        server.handle_message(
            1,
            ClientMessage::Move {
                x: 1.0,
                y: 1.0,
                direction: Direction::Up,
            },
        );
        server.handle_message(
            1,
            ClientMessage::Emoji {
                emoji: "happy".to_string(),
            },
        );

        assert!(drain(&mut b).is_empty());
        assert_eq!(server.registry().count(), 1);
    }

    #[test]
    fn test_move_updates_registry() {
        let mut server = test_server();
        let _rx = open(&mut server, 1);
        server.handle_message(1, join("bow"));

        server.handle_message(
            1,
            ClientMessage::Move {
                x: -50.0,
                y: 75.5,
                direction: Direction::Left,
            },
        );

        let player = server.registry().get(1).unwrap();
        assert_eq!(player.position, Position::new(-50.0, 75.5));
        assert_eq!(player.direction, Direction::Left);
    }

    #[test]
    fn test_emoji_echoes_to_sender() {
        let mut server = test_server();
        let mut a = open(&mut server, 1);
        server.handle_message(1, join("none"));
        drain(&mut a);

        server.handle_message(
            1,
            ClientMessage::Emoji {
                emoji: "cool".to_string(),
            },
        );

        assert_eq!(
            drain(&mut a),
            vec![ServerMessage::PlayerEmoji {
                id: 1,
                emoji: "cool".to_string()
            }]
        );
        let current = server.registry().get(1).unwrap().current_emoji.clone();
        assert_eq!(current.map(|e| e.kind), Some("cool".to_string()));
    }

    #[test]
    fn test_malformed_text_is_dropped() {
        let mut server = test_server();
        let mut a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("none"));
        server.handle_message(2, join("none"));
        drain(&mut a);
        drain(&mut b);

        server.handle_text(1, r#"{"event":"move","data":{"x":3}}"#);
        server.handle_text(1, "garbage");

        assert!(drain(&mut b).is_empty());
        assert_eq!(server.phase(1), Some(ConnectionPhase::Active));
        assert_eq!(server.registry().count(), 2);

        server.handle_text(1, r#"{"event":"move","data":{"x":3,"y":4,"direction":"down"}}"#);
        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::PlayerMoved {
                id: 1,
                x: 3.0,
                y: 4.0,
                direction: Direction::Down
            }]
        );
    }

    #[test]
    fn test_overflowing_move_is_dropped() {
        let mut server = test_server();
        let mut a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("none"));
        server.handle_message(2, join("none"));
        drain(&mut a);
        drain(&mut b);
        let before = server.registry().get(1).unwrap().clone();

        server.handle_text(1, r#"{"event":"move","data":{"x":1e39,"y":0,"direction":"up"}}"#);
        server.handle_text(1, r#"{"event":"move","data":{"x":0,"y":-1e39,"direction":"up"}}"#);

        assert_eq!(server.registry().get(1), Some(&before));
        assert!(drain(&mut b).is_empty());

        let mut c = open(&mut server, 3);
        drain(&mut c);
        server.handle_message(3, join("none"));

        let snapshot = drain(&mut c).remove(0);
        let wire = snapshot.to_json().unwrap();
        assert_eq!(ServerMessage::from_json(&wire).unwrap(), snapshot);
    }

    #[test]
    fn test_disconnect_before_join_is_silent() {
        let mut server = test_server();
        let _a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        drain(&mut b);

        server.disconnect(1);

        assert!(drain(&mut b).is_empty());
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut server = test_server();
        let _a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("none"));
        drain(&mut b);

        server.disconnect(1);
        server.disconnect(1);

        assert_eq!(drain(&mut b), vec![ServerMessage::PlayerLeft { id: 1 }]);
        assert_eq!(server.registry().count(), 0);
        assert_eq!(server.phase(1), None);
    }

    #[test]
    fn test_messages_after_disconnect_are_dropped() {
        let mut server = test_server();
        let _a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("none"));
        server.disconnect(1);
        drain(&mut b);

        server.handle_message(
            1,
            ClientMessage::Move {
                x: 1.0,
                y: 2.0,
                direction: Direction::Up,
            },
        );
        server.handle_message(1, join("party"));

        assert!(drain(&mut b).is_empty());
        assert_eq!(server.registry().count(), 0);
    }

    #[test]
    fn test_closed_outbox_triggers_cleanup() {
        let mut server = test_server();
        let a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        server.handle_message(1, join("none"));
        server.handle_message(2, join("none"));
        drain(&mut b);

        drop(a);
        server.handle_message(
            2,
            ClientMessage::Emoji {
                emoji: "sad".to_string(),
            },
        );

        assert_eq!(server.phase(1), None);
        assert_eq!(server.registry().count(), 1);
        assert_eq!(
            drain(&mut b),
            vec![
                ServerMessage::PlayerEmoji {
                    id: 2,
                    emoji: "sad".to_string()
                },
                ServerMessage::PlayerLeft { id: 1 },
            ]
        );
    }

    #[test]
    fn test_join_from_closed_connection_is_not_announced() {
        let mut server = test_server();
        let a = open(&mut server, 1);
        let mut b = open(&mut server, 2);
        drain(&mut b);

        drop(a);
        server.handle_message(1, join("party"));

        assert_eq!(server.registry().count(), 0);
        assert!(!drain(&mut b)
            .iter()
            .any(|message| matches!(message, ServerMessage::PlayerJoined(_))));
    }
}
