//! Core primitives.
//!
//! Identifiers and wall-clock helpers shared by the protocol, network,
//! game and room layers.

pub mod clock;
pub mod ids;

// Re-export core types
pub use clock::unix_now;
pub use ids::{ConnectionId, PlayerId, RoomId};
