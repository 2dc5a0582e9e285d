//! Authoritative in-memory registry of joined players
//!
//! This module owns the server's view of every player that has joined:
//! - Player creation with a jittered spawn point
//! - Position, direction, appearance and emoji updates from the owning connection
//! - Removal when the owning connection goes away
//! - Deterministic point-in-time snapshots for bootstrapping new joiners
//!
//! The registry is plain data with no interior locking. It must be owned by a
//! single logical task; the network layer guarantees that by routing every
//! mutation through the dispatch loop in [`crate::network`].

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    timestamp_ms, Appearance, ConnectionId, Direction, PlayerState, Position,
    DEFAULT_SPAWN_JITTER, SPAWN_X, SPAWN_Y,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("player {0} is already registered")]
    DuplicateId(ConnectionId),
}

/// Source of truth for all live players
///
/// Entries are keyed by connection id. A separate insertion-order list keeps
/// [`PlayerRegistry::snapshot`] deterministic regardless of hash ordering.
pub struct PlayerRegistry {
    players: HashMap<ConnectionId, PlayerState>,
    join_order: Vec<ConnectionId>,
    spawn: Position,
    spawn_jitter: f32,
    rng: StdRng,
}

impl PlayerRegistry {
    /// Creates an empty registry using the default spawn point and jitter
    pub fn new() -> Self {
        Self::with_rng(DEFAULT_SPAWN_JITTER, StdRng::from_entropy())
    }

    /// Creates an empty registry with a custom spawn jitter
    ///
    /// A jitter of zero places every player exactly on the spawn point.
    pub fn with_spawn_jitter(spawn_jitter: f32) -> Self {
        Self::with_rng(spawn_jitter, StdRng::from_entropy())
    }

    /// Creates a registry whose spawn jitter is reproducible
    pub fn with_seed(spawn_jitter: f32, seed: u64) -> Self {
        Self::with_rng(spawn_jitter, StdRng::seed_from_u64(seed))
    }

    fn with_rng(spawn_jitter: f32, rng: StdRng) -> Self {
        Self {
            players: HashMap::new(),
            join_order: Vec::new(),
            spawn: Position::new(SPAWN_X, SPAWN_Y),
            spawn_jitter: if spawn_jitter.is_finite() {
                spawn_jitter.abs()
            } else {
                warn!("Ignoring non-finite spawn jitter {}, spawning without jitter", spawn_jitter);
                0.0
            },
            rng,
        }
    }

    fn spawn_position(&mut self) -> Position {
        if self.spawn_jitter == 0.0 {
            return self.spawn;
        }

        let jitter = self.spawn_jitter;
        Position::new(
            self.spawn.x + self.rng.gen_range(-jitter..=jitter),
            self.spawn.y + self.rng.gen_range(-jitter..=jitter),
        )
    }

    /// Registers a new player for the given connection
    ///
    /// Returns the created state, or [`RegistryError::DuplicateId`] if the
    /// connection already owns an entry. The existing entry is left untouched
    /// in that case.
    pub fn add_player(
        &mut self,
        id: ConnectionId,
        appearance: Appearance,
    ) -> Result<PlayerState, RegistryError> {
        if self.players.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let position = self.spawn_position();
        let player = PlayerState::new(id, position, appearance);

        info!(
            "Added player {} at ({:.1}, {:.1}) wearing {}",
            id, position.x, position.y, appearance.hat
        );
        self.players.insert(id, player.clone());
        self.join_order.push(id);

        Ok(player)
    }

    /// Removes a player, returning its last state if it was present
    ///
    /// Removing an absent id is not an error; disconnect paths may race.
    pub fn remove_player(&mut self, id: ConnectionId) -> Option<PlayerState> {
        let removed = self.players.remove(&id)?;
        self.join_order.retain(|existing| *existing != id);
        info!("Removed player {}", id);
        Some(removed)
    }

    /// Records the owning client's latest position and facing
    ///
    /// Returns false when the id is unknown, which happens for late updates
    /// from a connection that was already cleaned up.
    pub fn update_position(
        &mut self,
        id: ConnectionId,
        x: f32,
        y: f32,
        direction: Direction,
    ) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.apply_move(x, y, direction);
                true
            }
            None => {
                debug!("Dropped position update for unknown player {}", id);
                false
            }
        }
    }

    /// Stamps a new mood signal on the player with the current time
    pub fn update_emoji(&mut self, id: ConnectionId, emoji: &str) -> bool {
        self.update_emoji_at(id, emoji, timestamp_ms())
    }

    pub fn update_emoji_at(&mut self, id: ConnectionId, emoji: &str, set_at: u64) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.set_emoji(emoji, set_at);
                true
            }
            None => {
                debug!("Dropped emoji update for unknown player {}", id);
                false
            }
        }
    }

    /// Replaces the appearance of an existing player
    ///
    /// Position and direction are left untouched. Returns the refreshed
    /// state, or `None` if the player is not registered.
    pub fn update_appearance(
        &mut self,
        id: ConnectionId,
        appearance: Appearance,
    ) -> Option<PlayerState> {
        let player = self.players.get_mut(&id)?;
        player.appearance = appearance;
        Some(player.clone())
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.players.contains_key(&id)
    }

    /// Point-in-time copy of every player in join order
    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.join_order
            .iter()
            .filter_map(|id| self.players.get(id))
            .cloned()
            .collect()
    }

    /// Returns the number of registered players
    pub fn count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
