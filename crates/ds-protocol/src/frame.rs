//! Frame header encoding/decoding
//!
//! The frame format uses an 8-byte header:
//! - version: 1 byte (u8, currently 1)
//! - flags: 1 byte (u8, reserved, must be 0)
//! - protocol_type: 2 bytes (u16, big-endian)
//! - payload_length: 4 bytes (u32, big-endian, max 16MB)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Frame format version written by this implementation
pub const FRAME_VERSION: u8 = 1;

/// Maximum payload size (16MB - 1)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing the sub-protocol and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sub-protocol of the message in the payload
    pub protocol_type: u16,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(protocol_type: u16, payload_length: u32) -> Self {
        Self {
            protocol_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(FRAME_VERSION);
        dst.put_u8(0);
        dst.put_u16(self.protocol_type);
        dst.put_u32(self.payload_length);
    }

    /// Parse and validate a header from the first `HEADER_SIZE` bytes of `src`
    ///
    /// Does not consume anything. Fails if fewer than `HEADER_SIZE` bytes
    /// are available or the header is invalid.
    pub fn parse(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "truncated header: {} of {} bytes",
                src.len(),
                HEADER_SIZE
            )));
        }

        let version = src[0];
        if version != FRAME_VERSION {
            return Err(ProtocolError::MalformedFrame(format!(
                "unsupported frame version {}",
                version
            )));
        }

        let flags = src[1];
        if flags != 0 {
            return Err(ProtocolError::MalformedFrame(format!(
                "reserved flags set: {:#04x}",
                flags
            )));
        }

        let protocol_type = u16::from_be_bytes([src[2], src[3]]);
        let payload_length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "length prefix {} exceeds maximum of {} bytes",
                payload_length, MAX_PAYLOAD_SIZE
            )));
        }

        Ok(Self {
            protocol_type,
            payload_length,
        })
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid; nothing is consumed in that case.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Self::parse(&src[..HEADER_SIZE])?;
        src.advance(HEADER_SIZE);

        Ok(Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(12345, 678);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], &[FRAME_VERSION, 0, 0x30, 0x39]);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_max_payload_length() {
        let header = FrameHeader::new(1, MAX_PAYLOAD_SIZE as u32);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length, MAX_PAYLOAD_SIZE as u32);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[FRAME_VERSION, 0, 0, 1][..]);
        let result = FrameHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::from(&[FRAME_VERSION, 0, 0, 1, 0x01, 0, 0, 0][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_unknown_version() {
        let result = FrameHeader::parse(&[0x7F, 0, 0, 1, 0, 0, 0, 10]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_reserved_flags() {
        let result = FrameHeader::parse(&[FRAME_VERSION, 0x80, 0, 1, 0, 0, 0, 10]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }
}
