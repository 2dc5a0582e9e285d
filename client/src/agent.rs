//! Client-side mirror of remote penguins and outbound intents

use log::{debug, info, warn};
use shared::{
    timestamp_ms, Appearance, ClientMessage, ConnectionId, Direction, EmojiSignal, Hat,
    PlayerState, ServerMessage,
};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("transport channel closed")]
    Closed,
}

/// Outbound half of a connection to the server
pub trait Transport {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError>;
}

/// Transport backed by the writer task's channel
///
/// The channel is swapped on every reconnect; between connections the
/// transport is detached and every send fails with
/// [`TransportError::NotConnected`].
#[derive(Debug, Default)]
pub struct ChannelTransport {
    sender: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn attach(&mut self, sender: mpsc::UnboundedSender<ClientMessage>) {
        self.sender = Some(sender);
    }

    pub fn detach(&mut self) {
        self.sender = None;
    }

    pub fn is_attached(&self) -> bool {
        self.sender.is_some()
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::NotConnected)?;
        sender.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Keeps the local view of every other penguin in step with the server
///
/// The join intent is only sent once both the transport is ready
/// ([`ClientSyncAgent::on_connect`]) and the user has picked an appearance
/// ([`ClientSyncAgent::confirm_join`]), in whichever order those happen.
/// Remote penguins are server-authoritative; the local penguin is not
/// mirrored here at all.
pub struct ClientSyncAgent<T: Transport> {
    transport: T,
    local_id: Option<ConnectionId>,
    transport_ready: bool,
    appearance: Option<Appearance>,
    join_sent: bool,
    remote_players: HashMap<ConnectionId, PlayerState>,
    local_emoji: Option<EmojiSignal>,
}

impl<T: Transport> ClientSyncAgent<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            local_id: None,
            transport_ready: false,
            appearance: None,
            join_sent: false,
            remote_players: HashMap::new(),
            local_emoji: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local_id
    }

    pub fn is_joined(&self) -> bool {
        self.join_sent
    }

    pub fn appearance(&self) -> Option<Appearance> {
        self.appearance
    }

    pub fn remote_players(&self) -> &HashMap<ConnectionId, PlayerState> {
        &self.remote_players
    }

    pub fn remote_player(&self, id: ConnectionId) -> Option<&PlayerState> {
        self.remote_players.get(&id)
    }

    /// Last emoji the server echoed back for the local penguin
    pub fn local_emoji(&self) -> Option<&EmojiSignal> {
        self.local_emoji.as_ref()
    }

    /// Marks the transport ready under the id the server assigned.
    /// Returns true if this sent the join intent.
    pub fn on_connect(&mut self, id: ConnectionId) -> bool {
        info!("Connected with id {}", id);
        self.local_id = Some(id);
        self.transport_ready = true;
        self.remote_players.remove(&id);
        self.try_join()
    }

    /// Records the user's chosen appearance. Confirming again after joining
    /// re-sends the join so the server refreshes the appearance.
    pub fn confirm_join(&mut self, hat: Hat) -> bool {
        self.appearance = Some(Appearance { hat });
        self.join_sent = false;
        self.try_join()
    }

    fn try_join(&mut self) -> bool {
        if !self.transport_ready || self.join_sent {
            return false;
        }
        let Some(appearance) = self.appearance else {
            return false;
        };

        let message = ClientMessage::Join {
            hat: appearance.hat.as_str().to_string(),
        };
        match self.transport.send(message) {
            Ok(()) => {
                info!("Joining as {} hat", appearance.hat);
                self.join_sent = true;
                true
            }
            Err(e) => {
                warn!("Failed to send join: {}", e);
                false
            }
        }
    }

    /// Drops everything tied to the old connection. The confirmed appearance
    /// is kept so the next [`ClientSyncAgent::on_connect`] joins again.
    pub fn on_disconnect(&mut self) {
        info!(
            "Disconnected, clearing {} mirrored players",
            self.remote_players.len()
        );
        self.transport_ready = false;
        self.join_sent = false;
        self.local_id = None;
        self.local_emoji = None;
        self.remote_players.clear();
    }

    pub fn on_snapshot(&mut self, players: Vec<PlayerState>) {
        let local_id = self.local_id;
        self.remote_players = players
            .into_iter()
            .filter(|player| Some(player.id) != local_id)
            .map(|player| (player.id, player))
            .collect();
        info!("Snapshot received: {} other players", self.remote_players.len());
    }

    pub fn on_player_joined(&mut self, player: PlayerState) {
        if Some(player.id) == self.local_id {
            return;
        }
        info!("Player {} joined wearing {}", player.id, player.appearance.hat);
        self.remote_players.insert(player.id, player);
    }

    /// Returns false for ids not in the mirror
    pub fn on_player_moved(
        &mut self,
        id: ConnectionId,
        x: f32,
        y: f32,
        direction: Direction,
    ) -> bool {
        match self.remote_players.get_mut(&id) {
            Some(player) => {
                player.apply_move(x, y, direction);
                true
            }
            None => {
                debug!("Move for unknown player {} ignored", id);
                false
            }
        }
    }

    pub fn on_player_emoji(&mut self, id: ConnectionId, emoji: &str) -> bool {
        let set_at = timestamp_ms();

        if Some(id) == self.local_id {
            self.local_emoji = Some(EmojiSignal {
                kind: emoji.to_string(),
                set_at,
            });
            return true;
        }

        match self.remote_players.get_mut(&id) {
            Some(player) => {
                player.set_emoji(emoji, set_at);
                true
            }
            None => {
                debug!("Emoji for unknown player {} ignored", id);
                false
            }
        }
    }

    pub fn on_player_left(&mut self, id: ConnectionId) -> Option<PlayerState> {
        let removed = self.remote_players.remove(&id);
        if removed.is_some() {
            info!("Player {} left", id);
        }
        removed
    }

    pub fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { id } => {
                self.on_connect(id);
            }
            ServerMessage::StateSnapshot { players } => self.on_snapshot(players),
            ServerMessage::PlayerJoined(player) => self.on_player_joined(player),
            ServerMessage::PlayerMoved { id, x, y, direction } => {
                self.on_player_moved(id, x, y, direction);
            }
            ServerMessage::PlayerEmoji { id, emoji } => {
                self.on_player_emoji(id, &emoji);
            }
            ServerMessage::PlayerLeft { id } => {
                self.on_player_left(id);
            }
        }
    }

    /// Fire-and-forget; returns whether the intent reached the transport
    pub fn send_move(&mut self, x: f32, y: f32, direction: Direction) -> bool {
        self.send_intent(ClientMessage::Move { x, y, direction })
    }

    pub fn send_emoji(&mut self, emoji: &str) -> bool {
        self.send_intent(ClientMessage::Emoji {
            emoji: emoji.to_string(),
        })
    }

    fn send_intent(&mut self, message: ClientMessage) -> bool {
        if !self.join_sent {
            return false;
        }
        match self.transport.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping intent: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Position;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<ClientMessage>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Closed);
            }
            self.sent.push(message);
            Ok(())
        }
    }

    fn player(id: ConnectionId, x: f32, y: f32) -> PlayerState {
        PlayerState::new(id, Position::new(x, y), Appearance::default())
    }

    fn joined_agent(id: ConnectionId) -> ClientSyncAgent<RecordingTransport> {
        let mut agent = ClientSyncAgent::new(RecordingTransport::default());
        agent.confirm_join(Hat::Party);
        agent.on_connect(id);
        agent
    }

    #[test]
    fn test_join_waits_for_transport() {
        let mut agent = ClientSyncAgent::new(RecordingTransport::default());

        assert!(!agent.confirm_join(Hat::Cowboy));
        assert!(agent.transport().sent.is_empty());

        assert!(agent.on_connect(4));
        assert_eq!(
            agent.transport().sent,
            vec![ClientMessage::Join {
                hat: "cowboy".to_string()
            }]
        );
        assert!(agent.is_joined());
    }

    #[test]
    fn test_join_waits_for_confirmation() {
        let mut agent = ClientSyncAgent::new(RecordingTransport::default());

        assert!(!agent.on_connect(4));
        assert!(agent.transport().sent.is_empty());
        assert_eq!(agent.local_id(), Some(4));

        assert!(agent.confirm_join(Hat::Egg));
        assert_eq!(agent.transport().sent.len(), 1);
    }

    #[test]
    fn test_join_sent_once() {
        let mut agent = joined_agent(1);
        agent.on_connect(1);

        assert_eq!(agent.transport().sent.len(), 1);
    }

    #[test]
    fn test_reconfirm_resends_join() {
        let mut agent = joined_agent(1);
        assert!(agent.confirm_join(Hat::Santa));

        assert_eq!(
            agent.transport().sent.last(),
            Some(&ClientMessage::Join {
                hat: "santa".to_string()
            })
        );
    }

    #[test]
    fn test_failed_join_is_retried_on_next_connect() {
        let mut agent = ClientSyncAgent::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        agent.confirm_join(Hat::Bow);
        assert!(!agent.on_connect(1));
        assert!(!agent.is_joined());

        agent.on_disconnect();
        agent.transport_mut().fail = false;
        assert!(agent.on_connect(2));
    }

    #[test]
    fn test_snapshot_replaces_and_filters_local() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(9, 0.0, 0.0));

        agent.on_snapshot(vec![player(1, 5.0, 5.0), player(2, 10.0, 10.0), player(3, 20.0, 20.0)]);

        assert_eq!(agent.remote_players().len(), 2);
        assert!(agent.remote_player(1).is_none());
        assert!(agent.remote_player(9).is_none());
        assert!(agent.remote_player(2).is_some());
    }

    #[test]
    fn test_player_joined_overwrites() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(2, 0.0, 0.0));

        let mut refreshed = player(2, 50.0, 60.0);
        refreshed.appearance.hat = Hat::Magician;
        agent.on_player_joined(refreshed);

        let mirrored = agent.remote_player(2).unwrap();
        assert_eq!(agent.remote_players().len(), 1);
        assert_eq!(mirrored.appearance.hat, Hat::Magician);
        assert_eq!(mirrored.position, Position::new(50.0, 60.0));
    }

    #[test]
    fn test_own_join_not_mirrored() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(1, 0.0, 0.0));

        assert!(agent.remote_players().is_empty());
    }

    #[test]
    fn test_move_updates_known_player() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(2, 0.0, 0.0));

        assert!(agent.on_player_moved(2, 10.0, 20.0, Direction::Right));

        let mirrored = agent.remote_player(2).unwrap();
        assert_eq!(mirrored.position, Position::new(10.0, 20.0));
        assert_eq!(mirrored.direction, Direction::Right);
    }

    #[test]
    fn test_move_for_unknown_player_ignored() {
        let mut agent = joined_agent(1);

        assert!(!agent.on_player_moved(7, 10.0, 20.0, Direction::Left));
        assert!(agent.remote_players().is_empty());
    }

    #[test]
    fn test_emoji_recorded_for_remote_and_local() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(2, 0.0, 0.0));

        assert!(agent.on_player_emoji(2, "happy"));
        assert!(agent.on_player_emoji(1, "cool"));
        assert!(!agent.on_player_emoji(8, "sad"));

        let remote = agent.remote_player(2).unwrap().current_emoji.clone().unwrap();
        assert_eq!(remote.kind, "happy");
        assert!(remote.set_at > 0);
        assert_eq!(agent.local_emoji().unwrap().kind, "cool");
    }

    #[test]
    fn test_player_left_removes() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(2, 0.0, 0.0));

        assert!(agent.on_player_left(2).is_some());
        assert!(agent.on_player_left(2).is_none());
        assert!(agent.remote_players().is_empty());
    }

    #[test]
    fn test_intents_require_join() {
        let mut agent = ClientSyncAgent::new(RecordingTransport::default());
        agent.on_connect(1);

        assert!(!agent.send_move(1.0, 2.0, Direction::Up));
        assert!(!agent.send_emoji("happy"));
        assert!(agent.transport().sent.is_empty());
    }

    #[test]
    fn test_intents_forwarded_after_join() {
        let mut agent = joined_agent(1);

        assert!(agent.send_move(1.0, 2.0, Direction::Up));
        assert!(agent.send_emoji("happy"));
        assert_eq!(
            &agent.transport().sent[1..],
            &[
                ClientMessage::Move {
                    x: 1.0,
                    y: 2.0,
                    direction: Direction::Up
                },
                ClientMessage::Emoji {
                    emoji: "happy".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_send_failure_is_absorbed() {
        let mut agent = joined_agent(1);
        agent.transport_mut().fail = true;

        assert!(!agent.send_move(1.0, 2.0, Direction::Up));
        assert!(agent.is_joined());
    }

    #[test]
    fn test_disconnect_clears_and_rejoins() {
        let mut agent = joined_agent(1);
        agent.on_player_joined(player(2, 0.0, 0.0));

        agent.on_disconnect();
        assert!(agent.remote_players().is_empty());
        assert!(!agent.is_joined());
        assert_eq!(agent.local_id(), None);

        assert!(agent.on_connect(5));
        assert_eq!(
            agent.transport().sent.last(),
            Some(&ClientMessage::Join {
                hat: "party".to_string()
            })
        );
        assert_eq!(agent.transport().sent.len(), 2);
    }

    #[test]
    fn test_handle_server_message_dispatch() {
        let mut agent = ClientSyncAgent::new(RecordingTransport::default());
        agent.confirm_join(Hat::None);

        agent.handle_server_message(ServerMessage::Connected { id: 3 });
        agent.handle_server_message(ServerMessage::StateSnapshot {
            players: vec![player(1, 0.0, 0.0)],
        });
        agent.handle_server_message(ServerMessage::PlayerJoined(player(2, 0.0, 0.0)));
        agent.handle_server_message(ServerMessage::PlayerMoved {
            id: 1,
            x: 3.0,
            y: 4.0,
            direction: Direction::Down,
        });
        agent.handle_server_message(ServerMessage::PlayerLeft { id: 2 });

        assert!(agent.is_joined());
        assert_eq!(agent.remote_players().len(), 1);
        assert_eq!(agent.remote_player(1).unwrap().position, Position::new(3.0, 4.0));
    }

    #[test]
    fn test_channel_transport() {
        let mut transport = ChannelTransport::new();
        assert_eq!(
            transport.send(ClientMessage::Emoji {
                emoji: "happy".to_string()
            }),
            Err(TransportError::NotConnected)
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(tx);
        assert!(transport.is_attached());
        tokio_test::assert_ok!(transport.send(ClientMessage::Join {
            hat: "none".to_string()
        }));
        tokio_test::assert_ok!(rx.try_recv());

        drop(rx);
        assert_eq!(
            transport.send(ClientMessage::Join {
                hat: "none".to_string()
            }),
            Err(TransportError::Closed)
        );

        transport.detach();
        assert!(!transport.is_attached());
    }
}
