//! Frame header encoding/decoding
//!
//! Each envelope on a stream transport is preceded by a 4-byte header
//! holding the JSON payload length (u32, big-endian).

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size (1 MiB). Envelopes are control metadata, never bulk data.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Frame header carrying the payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the JSON payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(payload_length: u32) -> Self {
        Self { payload_length }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the advertised length exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let payload_length = src.get_u32();
        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Some(Self { payload_length }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(12345);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; 2][..]);
        assert!(FrameHeader::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(MAX_PAYLOAD_SIZE as u32 + 1).encode(&mut buf);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
