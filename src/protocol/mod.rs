//! Wire protocol.
//!
//! Packets are a message id plus an opaque payload. The codec frames them
//! on the byte stream; structured payloads are bincode-encoded messages.

pub mod codec;
pub mod messages;
pub mod packet;

pub use codec::{CodecConfig, CodecError, Endianness, PacketCodec, DEFAULT_MAX_PAYLOAD, HEADER_LEN};
pub use messages::*;
pub use packet::{MessageId, Packet, PacketError};
