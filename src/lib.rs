//! # Lockstep Room Server
//!
//! Authenticated rooms with a fixed roster. Each room collects player
//! inputs into per-tick frames and broadcasts them so every client can
//! run the same simulation in lockstep.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LOCKSTEP ROOM SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers and clock                     │
//! │                                                              │
//! │  protocol/       - Wire format                               │
//! │  ├── packet.rs   - Message ids and packets                   │
//! │  ├── codec.rs    - Length-prefixed framing                   │
//! │  └── messages.rs - Payload structures                        │
//! │                                                              │
//! │  network/        - Connections (one task set each)           │
//! │  ├── connection.rs - Read / write / dispatch pipeline        │
//! │  ├── listener.rs - Accept loop                               │
//! │  ├── router.rs   - Authentication and routing                │
//! │  └── server.rs   - Server facade and configuration           │
//! │                                                              │
//! │  game/           - Per-room game logic                       │
//! │  ├── lockstep.rs - Frame buffer                              │
//! │  ├── player.rs   - Player session state                      │
//! │  ├── state.rs    - Game state machine                        │
//! │  └── events.rs   - Listener hooks                            │
//! │                                                              │
//! │  room/           - Room actors and registry                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! All game state of a room is owned by a single actor task. Joins,
//! leaves, messages and ticks are applied one at a time, so frames are
//! numbered consecutively and every player observes the same sequence.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod protocol;
pub mod room;

// Re-export commonly used types
pub use crate::core::{ConnectionId, PlayerId, RoomId};
pub use game::{Game, GameConfig, GameEvent, GameState, LockStep};
pub use network::{GameServer, ServerConfig};
pub use protocol::{MessageId, Packet, PacketCodec};
pub use room::{Room, RoomConfig, RoomManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default room tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Seconds a room waits for every player to become ready
pub const MAX_READY_TIME_SECS: u64 = 120;

/// Frame ceiling for a single game (3 minutes at 30 Hz, plus slack)
pub const MAX_GAME_FRAMES: u32 = 30 * 60 * 3 + 100;

/// Idle frames between broadcasts when no input arrived
pub const BROADCAST_OFFSET_FRAMES: u32 = 3;

/// Frames per catch-up message
pub const MAX_FRAMES_PER_MESSAGE: usize = 60;

/// Heartbeat age (seconds) after which a player stops receiving frames
pub const BAD_NETWORK_THRESHOLD_SECS: i64 = 2;
