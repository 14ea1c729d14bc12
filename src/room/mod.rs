//! Rooms.
//!
//! A room is an isolated, independently ticking game session with a fixed
//! roster. The manager is the process-wide registry of live rooms.

pub mod actor;
pub mod config;
pub mod manager;

pub use actor::Room;
pub use config::{RoomConfig, RoomError};
pub use manager::RoomManager;
