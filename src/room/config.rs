//! Room provisioning.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{PlayerId, RoomId};
use crate::game::GameConfig;
use crate::DEFAULT_TICK_RATE;

/// Room errors.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Room id zero is reserved.
    #[error("Invalid room id {0}")]
    InvalidRoomId(RoomId),

    /// Roster has no players.
    #[error("Room {0} has an empty roster")]
    EmptyRoster(RoomId),

    /// Player id zero is reserved.
    #[error("Invalid player id {0}")]
    InvalidPlayerId(PlayerId),

    /// Player listed twice.
    #[error("Player {0} appears twice in the roster")]
    DuplicatePlayer(PlayerId),

    /// Roster exceeds `max_players`.
    #[error("Roster has {count} players (max {max})")]
    TooManyPlayers {
        /// Roster size.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A room with this id is already registered.
    #[error("Room {0} already exists")]
    AlreadyExists(RoomId),
}

/// Room provisioning input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Room id.
    pub room_id: RoomId,
    /// Roster; order defines seat index.
    pub players: Vec<PlayerId>,
    /// Shared simulation seed.
    pub random_seed: u64,
    /// Token players must present.
    pub secret_key: String,
    /// Roster size limit, zero for none.
    pub max_players: usize,
    /// Tick rate; zero means the default.
    pub tick_frequency_hz: u32,
    /// Room lifetime limit, zero for unbounded.
    pub time_limit_secs: u64,
    /// Emit `EndingSoon` this long before the time limit, zero to disable.
    pub notify_before_end_secs: u64,
    /// Game tuning.
    pub game: GameConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            room_id: 0,
            players: Vec::new(),
            random_seed: 0,
            secret_key: String::new(),
            max_players: 0,
            tick_frequency_hz: DEFAULT_TICK_RATE,
            time_limit_secs: 0,
            notify_before_end_secs: 0,
            game: GameConfig::default(),
        }
    }
}

impl RoomConfig {
    /// Config for a room with the given roster and secret.
    pub fn new(room_id: RoomId, players: Vec<PlayerId>, secret_key: impl Into<String>) -> Self {
        Self {
            room_id,
            players,
            secret_key: secret_key.into(),
            ..Default::default()
        }
    }

    /// Check the roster.
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.room_id == 0 {
            return Err(RoomError::InvalidRoomId(self.room_id));
        }
        if self.players.is_empty() {
            return Err(RoomError::EmptyRoster(self.room_id));
        }
        if self.max_players > 0 && self.players.len() > self.max_players {
            return Err(RoomError::TooManyPlayers {
                count: self.players.len(),
                max: self.max_players,
            });
        }

        let mut seen = BTreeSet::new();
        for &player_id in &self.players {
            if player_id == 0 {
                return Err(RoomError::InvalidPlayerId(player_id));
            }
            if !seen.insert(player_id) {
                return Err(RoomError::DuplicatePlayer(player_id));
            }
        }
        Ok(())
    }

    /// Interval between room ticks.
    pub fn tick_interval(&self) -> Duration {
        let hz = if self.tick_frequency_hz == 0 {
            DEFAULT_TICK_RATE
        } else {
            self.tick_frequency_hz
        };
        Duration::from_secs(1) / hz
    }
}
