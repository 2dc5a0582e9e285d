//! Local penguin movement and emoji bookkeeping

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{
    Direction, Position, WorldMode, PLAYER_RADIUS, PLAYER_SPEED, SPAWN_X, SPAWN_Y, WORLD_MAX,
    WORLD_MIN,
};
use std::collections::HashMap;

/// Default seconds between unconditional position re-sends
pub const DEFAULT_RESEND_INTERVAL: f32 = 1.0;

/// Movement keys held during a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    /// Horizontal keys win over vertical ones; right wins over left.
    pub fn direction(&self) -> Direction {
        if self.right {
            Direction::Right
        } else if self.left {
            Direction::Left
        } else if self.up {
            Direction::Up
        } else if self.down {
            Direction::Down
        } else {
            Direction::Idle
        }
    }
}

/// Position report ready to hand to the sync agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveIntent {
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
}

/// Moves the local penguin optimistically and decides when to report it
///
/// A move intent is produced whenever the position or facing changes, and
/// otherwise once per resend interval so a dropped move is eventually
/// corrected on every other client.
pub struct LocalPlayerController {
    position: Position,
    direction: Direction,
    speed: f32,
    resend_interval: f32,
    since_last_send: f32,
    last_sent: Option<MoveIntent>,
}

impl LocalPlayerController {
    pub fn new(position: Position) -> Self {
        Self {
            position: Self::clamp(position),
            direction: Direction::Idle,
            speed: PLAYER_SPEED,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            since_last_send: 0.0,
            last_sent: None,
        }
    }

    pub fn with_resend_interval(mut self, seconds: f32) -> Self {
        self.resend_interval = seconds.max(0.0);
        self
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Makes the next [`LocalPlayerController::update`] report regardless of change
    pub fn force_resend(&mut self) {
        self.last_sent = None;
    }

    /// Applies one frame of input without deciding anything about the network
    pub fn step(&mut self, input: InputState, dt: f32) {
        let distance = self.speed * dt.max(0.0);
        let mut dx = 0.0;
        let mut dy = 0.0;

        if input.left {
            dx = -distance;
        }
        if input.right {
            dx = distance;
        }
        if input.up {
            dy = -distance;
        }
        if input.down {
            dy = distance;
        }

        self.position = Self::clamp(Position::new(self.position.x + dx, self.position.y + dy));
        self.direction = input.direction();
    }

    pub fn update(&mut self, input: InputState, dt: f32) -> Option<MoveIntent> {
        self.step(input, dt);
        self.since_last_send += dt.max(0.0);

        let intent = MoveIntent {
            x: self.position.x,
            y: self.position.y,
            direction: self.direction,
        };

        let changed = self.last_sent != Some(intent);
        if changed || self.since_last_send >= self.resend_interval {
            self.last_sent = Some(intent);
            self.since_last_send = 0.0;
            Some(intent)
        } else {
            None
        }
    }

    fn clamp(position: Position) -> Position {
        let min = WORLD_MIN + PLAYER_RADIUS;
        let max = WORLD_MAX - PLAYER_RADIUS;
        Position::new(position.x.clamp(min, max), position.y.clamp(min, max))
    }
}

impl Default for LocalPlayerController {
    fn default() -> Self {
        Self::new(Position::new(SPAWN_X, SPAWN_Y))
    }
}

/// Counts the emoji the local player has sent this session
#[derive(Debug, Default)]
pub struct EmojiTally {
    counts: HashMap<String, u32>,
}

impl EmojiTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, emoji: &str) {
        *self.counts.entry(emoji.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, emoji: &str) -> u32 {
        self.counts.get(emoji).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Ties go to the alphabetically first emoji
    pub fn most_used(&self) -> Option<(&str, u32)> {
        self.counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(emoji, count)| (emoji.as_str(), *count))
    }
}

/// Random key presser for the headless client
///
/// Holds one movement choice for a random number of frames, then picks
/// another.
pub struct WanderingBot {
    rng: StdRng,
    input: InputState,
    frames_left: u32,
}

impl WanderingBot {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            input: InputState::default(),
            frames_left: 0,
        }
    }

    pub fn next_input(&mut self) -> InputState {
        if self.frames_left == 0 {
            self.input = match self.rng.gen_range(0..5) {
                0 => InputState::default(),
                1 => InputState {
                    up: true,
                    ..Default::default()
                },
                2 => InputState {
                    down: true,
                    ..Default::default()
                },
                3 => InputState {
                    left: true,
                    ..Default::default()
                },
                _ => InputState {
                    right: true,
                    ..Default::default()
                },
            };
            self.frames_left = self.rng.gen_range(10..40);
        }

        self.frames_left -= 1;
        self.input
    }

    pub fn pick_emoji(&mut self, mode: WorldMode) -> Option<&'static str> {
        mode.emoji_palette().choose(&mut self.rng).copied()
    }
}

impl Default for WanderingBot {
    fn default() -> Self {
        Self::new()
    }
}
