//! Packet Codec
//!
//! Wire frame:
//!
//! ```text
//! [ length : u16 ][ message id : u8 ][ payload : length bytes ]
//! ```
//!
//! `length` excludes the header. Big-endian unless configured otherwise.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::packet::Packet;

/// Header size in bytes.
pub const HEADER_LEN: usize = 3;

/// Default payload cap.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Declared or actual payload exceeds the configured maximum.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Underlying stream error, including premature end of stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte order of the length field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    /// Network byte order.
    #[default]
    Big,
    /// Little-endian.
    Little,
}

/// Codec configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Length field byte order.
    pub endianness: Endianness,
    /// Maximum payload size.
    pub max_payload: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            endianness: Endianness::Big,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Stateless packet framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    endianness: Endianness,
    max_payload: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::from(CodecConfig::default())
    }
}

impl From<CodecConfig> for PacketCodec {
    fn from(config: CodecConfig) -> Self {
        Self::new(config.endianness, config.max_payload)
    }
}

impl PacketCodec {
    /// Create a codec. The cap is clamped to what the length field can express.
    pub fn new(endianness: Endianness, max_payload: usize) -> Self {
        Self {
            endianness,
            max_payload: max_payload.min(u16::MAX as usize),
        }
    }

    /// Maximum payload size.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Length field byte order.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Check a packet against the size cap.
    pub fn check(&self, packet: &Packet) -> Result<(), CodecError> {
        let len = packet.payload().len();
        if len > self.max_payload {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }
        Ok(())
    }

    /// Encode a packet into a wire frame.
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        self.check(packet)?;

        let len = packet.payload().len() as u16;
        let len_bytes = match self.endianness {
            Endianness::Big => len.to_be_bytes(),
            Endianness::Little => len.to_le_bytes(),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + packet.payload().len());
        buf.extend_from_slice(&len_bytes);
        buf.push(packet.raw_id());
        buf.extend_from_slice(packet.payload());
        Ok(buf)
    }

    /// Read one packet. Suspends until the header and then the full payload
    /// are available. An oversized length is rejected before the payload is read.
    pub async fn decode<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Packet, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let len_bytes = [header[0], header[1]];
        let len = match self.endianness {
            Endianness::Big => u16::from_be_bytes(len_bytes),
            Endianness::Little => u16::from_le_bytes(len_bytes),
        } as usize;

        if len > self.max_payload {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        Ok(Packet::raw(header[2], payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::MessageId;
    use proptest::prelude::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_header_layout_big_endian() {
        let codec = PacketCodec::default();
        let frame = codec
            .encode(&Packet::new(MessageId::Input, vec![0xAA; 258]))
            .unwrap();
        assert_eq!(&frame[..HEADER_LEN], &[0x01, 0x02, 6]);
        assert_eq!(frame.len(), HEADER_LEN + 258);
    }

    #[test]
    fn test_header_layout_little_endian() {
        let codec = PacketCodec::new(Endianness::Little, DEFAULT_MAX_PAYLOAD);
        let frame = codec
            .encode(&Packet::new(MessageId::Input, vec![0xAA; 258]))
            .unwrap();
        assert_eq!(&frame[..HEADER_LEN], &[0x02, 0x01, 6]);

        let decoded = block_on(codec.decode(&mut frame.as_slice())).unwrap();
        assert_eq!(decoded.payload().len(), 258);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = PacketCodec::new(Endianness::Big, 8);
        let result = codec.encode(&Packet::new(MessageId::Input, vec![0u8; 9]));
        assert!(matches!(result, Err(CodecError::FrameTooLarge { len: 9, max: 8 })));
    }

    #[test]
    fn test_decode_rejects_before_payload() {
        let codec = PacketCodec::new(Endianness::Big, 8);
        // Header declares 100 bytes but none follow: must fail on size, not EOF.
        let bytes = [0u8, 100, 6];
        let result = block_on(codec.decode(&mut &bytes[..]));
        assert!(matches!(result, Err(CodecError::FrameTooLarge { len: 100, max: 8 })));
    }

    #[test]
    fn test_decode_truncated_stream() {
        let codec = PacketCodec::default();
        let bytes = [0u8, 4, 6, 1, 2];
        let result = block_on(codec.decode(&mut &bytes[..]));
        match result {
            Err(CodecError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {:?}", other),
        }
    }

    #[test]
    fn test_max_payload_clamped() {
        let codec = PacketCodec::new(Endianness::Big, 1 << 20);
        assert_eq!(codec.max_payload(), u16::MAX as usize);
    }

    #[tokio::test]
    async fn test_decode_consecutive_frames() {
        let codec = PacketCodec::default();
        let mut wire = codec.encode(&Packet::empty(MessageId::Heartbeat)).unwrap();
        wire.extend(codec.encode(&Packet::new(MessageId::End, vec![7u8])).unwrap());

        let mut reader = wire.as_slice();
        let first = codec.decode(&mut reader).await.unwrap();
        let second = codec.decode(&mut reader).await.unwrap();
        assert_eq!(first.message_id(), Some(MessageId::Heartbeat));
        assert!(first.payload().is_empty());
        assert_eq!(second.message_id(), Some(MessageId::End));
        assert_eq!(second.payload().as_ref(), &[7u8]);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            id in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=512),
            little in any::<bool>(),
        ) {
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let codec = PacketCodec::new(endianness, 512);
            let packet = Packet::raw(id, payload);

            let frame = codec.encode(&packet).unwrap();
            let decoded = block_on(codec.decode(&mut frame.as_slice())).unwrap();
            prop_assert_eq!(decoded, packet);
        }
    }
}
