//! Game Events
//!
//! Hooks the game fires into its owning room, and the event type rooms
//! publish to external subscribers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{PlayerId, RoomId};
use crate::game::state::GameState;

/// Notifications fired by [`Game`](crate::game::Game) from inside the room actor.
pub trait GameListener: Send {
    /// A player attached a connection.
    fn on_join_game(&self, room_id: RoomId, player_id: PlayerId);

    /// The game entered Gaming.
    fn on_start_game(&self, room_id: RoomId, start_time: i64);

    /// A player's current connection left.
    fn on_leave_game(&self, room_id: RoomId, player_id: PlayerId);

    /// The game is over. Fired exactly once.
    fn on_game_over(&self, room_id: RoomId, results: &BTreeMap<PlayerId, PlayerId>);

    /// State moved forward.
    fn on_state_changed(&self, room_id: RoomId, from: GameState, to: GameState);
}

/// Room lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Player connected into the room
    PlayerJoined {
        /// Room id.
        room_id: RoomId,
        /// Player id.
        player_id: PlayerId,
    },

    /// Game started
    GameStarted {
        /// Room id.
        room_id: RoomId,
        /// Unix start time, as broadcast in Start.
        start_time: i64,
    },

    /// Player's connection left
    PlayerLeft {
        /// Room id.
        room_id: RoomId,
        /// Player id.
        player_id: PlayerId,
    },

    /// State transition
    StateChanged {
        /// Room id.
        room_id: RoomId,
        /// Previous state.
        from: GameState,
        /// New state.
        to: GameState,
    },

    /// Game over with declared results (reporter -> winner)
    GameOver {
        /// Room id.
        room_id: RoomId,
        /// Reporter to declared winner.
        results: BTreeMap<PlayerId, PlayerId>,
    },

    /// Room time limit is close
    EndingSoon {
        /// Room id.
        room_id: RoomId,
        /// Seconds until the time limit.
        remaining_secs: u64,
    },

    /// Room actor exited
    Closed {
        /// Room id.
        room_id: RoomId,
    },
}

impl GameEvent {
    /// Room the event belongs to.
    pub fn room_id(&self) -> RoomId {
        match self {
            GameEvent::PlayerJoined { room_id, .. }
            | GameEvent::GameStarted { room_id, .. }
            | GameEvent::PlayerLeft { room_id, .. }
            | GameEvent::StateChanged { room_id, .. }
            | GameEvent::GameOver { room_id, .. }
            | GameEvent::EndingSoon { room_id, .. }
            | GameEvent::Closed { room_id } => *room_id,
        }
    }
}
