use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const SPAWN_X: f32 = 400.0;
pub const SPAWN_Y: f32 = 300.0;
pub const DEFAULT_SPAWN_JITTER: f32 = 20.0;
pub const PLAYER_SPEED: f32 = 100.0;
pub const PLAYER_RADIUS: f32 = 16.0;
pub const WORLD_MIN: f32 = -2000.0;
pub const WORLD_MAX: f32 = 2000.0;

/// Transport-assigned identifier of a live connection.
pub type ConnectionId = u32;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
    #[error("unknown hat: {0}")]
    UnknownHat(String),
    #[error("unknown world mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Idle,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hat {
    #[default]
    None,
    Party,
    Egg,
    Magician,
    Bow,
    Cowboy,
    Watermelon,
    Baseball,
    Santa,
}

impl Hat {
    pub const ALL: [Hat; 9] = [
        Hat::None,
        Hat::Party,
        Hat::Egg,
        Hat::Magician,
        Hat::Bow,
        Hat::Cowboy,
        Hat::Watermelon,
        Hat::Baseball,
        Hat::Santa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hat::None => "none",
            Hat::Party => "party",
            Hat::Egg => "egg",
            Hat::Magician => "magician",
            Hat::Bow => "bow",
            Hat::Cowboy => "cowboy",
            Hat::Watermelon => "watermelon",
            Hat::Baseball => "baseball",
            Hat::Santa => "santa",
        }
    }

    /// Looks up a hat by its wire tag. Tags are case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Hat> {
        Hat::ALL.iter().copied().find(|hat| hat.as_str() == tag)
    }

    /// Unknown tags fall back to [`Hat::None`].
    pub fn from_tag_or_none(tag: &str) -> Hat {
        Hat::from_tag(tag).unwrap_or_default()
    }
}

impl fmt::Display for Hat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hat::from_tag(s).ok_or_else(|| ProtocolError::UnknownHat(s.to_string()))
    }
}

const ICEBERG_EMOJIS: [&str; 15] = [
    "happy",
    "sad",
    "relieved",
    "silly",
    "surprised",
    "laughing",
    "cool",
    "cowboy_face",
    "angry",
    "clown",
    "tired",
    "dizzy",
    "thinking",
    "hot",
    "smirk",
];

const HOLIDAY_EMOJIS: [&str; 10] = [
    "party_popper",
    "gift",
    "confetti",
    "christmas_tree",
    "partying",
    "balloon",
    "sparkles",
    "birthday_cake",
    "dancing_woman",
    "dancing_man",
];

/// Which world the client is playing in. Only decides the emoji palette here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorldMode {
    #[default]
    Iceberg,
    Holiday,
}

impl WorldMode {
    pub fn emoji_palette(&self) -> &'static [&'static str] {
        match self {
            WorldMode::Iceberg => &ICEBERG_EMOJIS,
            WorldMode::Holiday => &HOLIDAY_EMOJIS,
        }
    }
}

impl fmt::Display for WorldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldMode::Iceberg => f.write_str("iceberg"),
            WorldMode::Holiday => f.write_str("holiday"),
        }
    }
}

impl FromStr for WorldMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iceberg" | "default" => Ok(WorldMode::Iceberg),
            "holiday" => Ok(WorldMode::Holiday),
            other => Err(ProtocolError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Appearance {
    pub hat: Hat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiSignal {
    #[serde(rename = "type")]
    pub kind: String,
    pub set_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: ConnectionId,
    pub position: Position,
    pub direction: Direction,
    pub appearance: Appearance,
    pub current_emoji: Option<EmojiSignal>,
}

impl PlayerState {
    pub fn new(id: ConnectionId, position: Position, appearance: Appearance) -> Self {
        Self {
            id,
            position,
            direction: Direction::Idle,
            appearance,
            current_emoji: None,
        }
    }

    pub fn apply_move(&mut self, x: f32, y: f32, direction: Direction) {
        self.position = Position { x, y };
        self.direction = direction;
    }

    pub fn set_emoji(&mut self, kind: &str, set_at: u64) {
        self.current_emoji = Some(EmojiSignal {
            kind: kind.to_string(),
            set_at,
        });
    }
}

/// Intents sent by a client. The sender is implied by the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        hat: String,
    },
    Move {
        x: f32,
        y: f32,
        direction: Direction,
    },
    Emoji {
        emoji: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    Connected {
        id: ConnectionId,
    },
    StateSnapshot {
        players: Vec<PlayerState>,
    },
    PlayerJoined(PlayerState),
    PlayerMoved {
        id: ConnectionId,
        x: f32,
        y: f32,
        direction: Direction,
    },
    PlayerEmoji {
        id: ConnectionId,
        emoji: String,
    },
    PlayerLeft {
        id: ConnectionId,
    },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::StateSnapshot { .. } => "state-snapshot",
            ServerMessage::PlayerJoined(_) => "player-joined",
            ServerMessage::PlayerMoved { .. } => "player-moved",
            ServerMessage::PlayerEmoji { .. } => "player-emoji",
            ServerMessage::PlayerLeft { .. } => "player-left",
        }
    }
}

/// Current Unix time in milliseconds.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
