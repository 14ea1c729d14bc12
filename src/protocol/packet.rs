//! Packets
//!
//! A packet is an immutable `(message id, payload)` pair. Payloads are
//! reference-counted so one encoded broadcast is shared across every
//! player's outbound queue.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Message ids recognized by the router and the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    /// Authenticate into a room.
    Connect = 1,
    /// Keepalive, echoed back.
    Heartbeat = 2,
    /// Request seat, seed and the other players' progress.
    JoinRoom = 3,
    /// Loading progress report.
    Progress = 4,
    /// Player finished loading (or reconnected).
    Ready = 5,
    /// Per-tick player input.
    Input = 6,
    /// Declared game outcome.
    Result = 7,
    /// Server push of lockstep frames.
    Frame = 8,
    /// Game start broadcast.
    Start = 9,
    /// Room closing broadcast.
    Close = 10,
    /// Diagnostic echo.
    End = 11,
}

impl MessageId {
    /// Map a raw wire id to a known message id.
    pub fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            1 => Self::Connect,
            2 => Self::Heartbeat,
            3 => Self::JoinRoom,
            4 => Self::Progress,
            5 => Self::Ready,
            6 => Self::Input,
            7 => Self::Result,
            8 => Self::Frame,
            9 => Self::Start,
            10 => Self::Close,
            11 => Self::End,
            _ => return None,
        })
    }

    /// Raw wire id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Payload (de)serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// Message could not be serialized.
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] bincode::Error),

    /// Payload is not a valid message of the expected type.
    #[error("Failed to decode payload: {0}")]
    Decode(#[source] bincode::Error),
}

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: u8,
    payload: Bytes,
}

impl Packet {
    /// Create a packet for a known message id.
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self::raw(id.as_u8(), payload)
    }

    /// Create a packet with no payload.
    pub fn empty(id: MessageId) -> Self {
        Self::raw(id.as_u8(), Bytes::new())
    }

    /// Create a packet from a raw wire id.
    pub fn raw(id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Create a packet carrying a bincode-encoded message.
    pub fn with_message<T: Serialize>(id: MessageId, message: &T) -> Result<Self, PacketError> {
        let bytes = bincode::serialize(message).map_err(PacketError::Encode)?;
        Ok(Self::new(id, bytes))
    }

    /// Known message id, if any.
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::from_u8(self.id)
    }

    /// Raw wire id.
    pub fn raw_id(&self) -> u8 {
        self.id
    }

    /// Payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decode the payload as a bincode message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PacketError> {
        bincode::deserialize(&self.payload).map_err(PacketError::Decode)
    }
}
