//! Message encoding and the tokio codec for framed protocol messages
//!
//! A frame is a [`FrameHeader`] followed by a bincode payload holding the
//! message type, properties and body. The protocol type travels in the
//! header so that a receiver can echo it even for sub-protocols it does not
//! understand.

use std::collections::BTreeMap;

use bincode::Options;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// Borrowed view of the payload used when encoding
#[derive(Serialize)]
struct PayloadRef<'a> {
    message_type: &'a str,
    properties: &'a BTreeMap<String, String>,
    body: &'a Bytes,
}

/// Owned payload produced when decoding
#[derive(Deserialize)]
struct Payload {
    message_type: String,
    properties: BTreeMap<String, String>,
    body: Bytes,
}

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_PAYLOAD_SIZE as u64)
        .reject_trailing_bytes()
}

fn encode_payload(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = payload_options().serialize(&PayloadRef {
        message_type: &message.message_type,
        properties: &message.properties,
        body: &message.body,
    })?;

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(payload)
}

fn decode_payload(header: FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    let payload: Payload = payload_options()
        .deserialize(payload)
        .map_err(|e| ProtocolError::MalformedFrame(format!("invalid payload: {}", e)))?;

    Ok(Message {
        protocol_type: header.protocol_type,
        message_type: payload.message_type,
        properties: payload.properties,
        body: payload.body,
    })
}

fn write_frame(message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = encode_payload(message)?;

    let header = FrameHeader::new(message.protocol_type, payload.len() as u32);
    dst.reserve(HEADER_SIZE + payload.len());
    header.encode(dst);
    dst.extend_from_slice(&payload);

    Ok(())
}

/// Encode a message into one complete frame
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    write_frame(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one complete frame
///
/// Fails with `MalformedFrame` if the bytes are truncated, longer than the
/// length prefix announces, or structurally invalid. Unknown protocol and
/// message types are not errors at this layer.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let header = FrameHeader::parse(frame)?;

    let expected = HEADER_SIZE + header.payload_length as usize;
    if frame.len() < expected {
        return Err(ProtocolError::MalformedFrame(format!(
            "truncated frame: expected {} bytes, got {}",
            expected,
            frame.len()
        )));
    }
    if frame.len() > expected {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} trailing bytes after frame",
            frame.len() - expected
        )));
    }

    decode_payload(header, &frame[HEADER_SIZE..])
}

/// Codec for encoding/decoding protocol frames on a byte stream
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl MessageCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len);
        let message = decode_payload(header, &payload)?;

        tracing::trace!(
            protocol_type = message.protocol_type,
            message_type = %message.message_type,
            body_len = message.body.len(),
            "decoded frame"
        );

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&message, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ShellMessageType, Status, PROP_SESSION_ID, PROTO_TYPE_SHELL};

    fn sample() -> Message {
        Message::shell(ShellMessageType::Shell)
            .with_status(Status::Normal)
            .with_property(PROP_SESSION_ID, "4f1c")
            .with_body(Bytes::from_static(b"ls /\n"))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let message = sample();
        let frame = encode(&message).unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_roundtrip_empty_and_binary_bodies() {
        let empty = Message::new(PROTO_TYPE_SHELL, "stop_shell");
        assert_eq!(decode(&encode(&empty).unwrap()).unwrap(), empty);

        let binary = Message::new(7, "")
            .with_body(Bytes::from(vec![0u8, 0xFF, 0x00, 0x1B, 0x80, 0xC3]));
        assert_eq!(decode(&encode(&binary).unwrap()).unwrap(), binary);
    }

    #[test]
    fn test_unknown_types_decode() {
        let message = Message::new(12345, "bogusmessage");
        let decoded = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.protocol_type, 12345);
        assert_eq!(decoded.message_type, "bogusmessage");
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = encode(&sample()).unwrap();

        for len in [0, 3, HEADER_SIZE, frame.len() - 1] {
            let result = decode(&frame[..len]);
            assert!(
                matches!(result, Err(ProtocolError::MalformedFrame(_))),
                "length {} should be malformed",
                len
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = encode(&sample()).unwrap().to_vec();
        frame.push(0);
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        // Header announces 8 bytes; payload claims a huge string length
        let mut frame = BytesMut::new();
        FrameHeader::new(PROTO_TYPE_SHELL, 8).encode(&mut frame);
        frame.extend_from_slice(&[0xFF; 8]);

        let result = decode(&frame);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = MessageCodec::new();

        let mut full_buf = BytesMut::new();
        codec.encode(sample(), &mut full_buf).unwrap();

        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, payload still missing
        partial.extend_from_slice(&full_buf.split_to(3));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, sample());
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_multiple_frames_in_buffer() {
        let mut codec = MessageCodec::new();
        let first = sample();
        let second = Message::new(PROTO_TYPE_SHELL, "stop_shell");

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_rejects_bad_header() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0x42, 0, 0, 1, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(64);
        let mut left = Framed::new(a, MessageCodec::new());
        let mut right = Framed::new(b, MessageCodec::new());

        // Larger than the duplex buffer so the frame arrives in pieces
        let message = sample().with_body(Bytes::from(vec![b'x'; 1000]));
        let expected = message.clone();

        let sender = tokio::spawn(async move {
            left.send(message).await.unwrap();
            left
        });

        let received = right.next().await.unwrap().unwrap();
        assert_eq!(received, expected);
        sender.await.unwrap();
    }
}
