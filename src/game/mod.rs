//! Game Logic Module
//!
//! Everything in here runs inside a single room actor.
//!
//! ## Module Structure
//!
//! - `lockstep`: Sparse per-tick frame buffer
//! - `player`: Room-scoped player session state
//! - `state`: Game state machine
//! - `events`: Listener hooks and room events

pub mod events;
pub mod lockstep;
pub mod player;
pub mod state;

// Re-export key types
pub use events::{GameEvent, GameListener};
pub use lockstep::{Frame, LockStep};
pub use player::Player;
pub use state::{Game, GameConfig, GameState, JoinError};
