//! Payload Messages
//!
//! Structured payloads carried inside packets, bincode-encoded.
//! Heartbeat, Ready and Close carry empty payloads and have no type here.

use serde::{Deserialize, Serialize};

use crate::core::{PlayerId, RoomId};

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// First message on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Room to join.
    pub room_id: RoomId,
    /// Player identity, must be on the room roster.
    pub player_id: PlayerId,
    /// Room secret.
    pub token: String,
}

/// Outcome of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Authenticated and joined.
    Ok,
    /// No room with that id.
    NoRoom,
    /// Room exists but its game is over.
    RoomOver,
    /// Player is not on the roster.
    NoPlayer,
    /// Token does not match the room secret.
    BadToken,
}

/// Connect acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Result of the attempt.
    pub error_code: ErrorCode,
}

impl ConnectResponse {
    /// Response with the given code.
    pub fn new(error_code: ErrorCode) -> Self {
        Self { error_code }
    }
}

// =============================================================================
// LOBBY
// =============================================================================

/// Another player's loading state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Player id.
    pub player_id: PlayerId,
    /// Loading progress (0-100).
    pub progress: i32,
}

/// Reply to JoinRoom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomReply {
    /// Caller's seat (1-based roster order).
    pub seat_index: u32,
    /// Shared simulation seed.
    pub random_seed: u64,
    /// Everyone else on the roster.
    pub others: Vec<PeerInfo>,
}

/// Client loading progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Loading progress (0-100).
    pub progress: i32,
}

/// Progress rebroadcast to the other players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressNotice {
    /// Reporting player.
    pub player_id: PlayerId,
    /// Loading progress (0-100).
    pub progress: i32,
}

/// Game start broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartNotice {
    /// Shared start time (unix seconds).
    pub timestamp: i64,
}

// =============================================================================
// GAMEPLAY
// =============================================================================

/// Input as sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommand {
    /// Client-side sequence number.
    pub sequence_id: u32,
    /// Opaque input axis.
    pub x: i32,
    /// Opaque input axis.
    pub y: i32,
}

/// Input stamped with the sender's identity, as stored in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputData {
    /// Sending player.
    pub player_id: PlayerId,
    /// Sender's seat.
    pub seat_index: u32,
    /// Client-side sequence number.
    pub sequence_id: u32,
    /// Opaque input axis.
    pub x: i32,
    /// Opaque input axis.
    pub y: i32,
}

impl InputData {
    /// Stamp a client command with the sender's identity.
    pub fn from_command(player_id: PlayerId, seat_index: u32, command: InputCommand) -> Self {
        Self {
            player_id,
            seat_index,
            sequence_id: command.sequence_id,
            x: command.x,
            y: command.y,
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameData {
    /// Frame index.
    pub frame_id: u32,
    /// Inputs recorded for that frame, in arrival order.
    pub inputs: Vec<InputData>,
}

/// Frame push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBatch {
    /// Consecutive frames in ascending order.
    pub frames: Vec<FrameData>,
}

/// Declared game outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReport {
    /// Winner as seen by the reporting client.
    pub winner_id: PlayerId,
}
