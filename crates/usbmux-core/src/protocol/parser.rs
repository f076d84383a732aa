//! Incremental frame reassembly.
//!
//! A daemon connection is a byte stream: one read may deliver a fragment of a
//! frame, exactly one frame, or several frames back to back.  [`FrameParser`]
//! keeps the partial state between reads and emits each complete message
//! exactly once, in arrival order.
//!
//! ```text
//! chunk ──► [header: 16 bytes] ──► remaining = length - 16
//!                 │
//!                 ▼
//!           [payload bytes] ──(remaining == 0)──► decode ──► on_message
//!                 │
//!           leftover bytes loop back to the header step
//! ```
//!
//! Header bytes are buffered too, so even 1-byte chunks reassemble correctly.

use tracing::trace;

use crate::protocol::codec::{decode_header, decode_payload, CodecError};
use crate::protocol::messages::{MuxMessage, HEADER_SIZE};

/// Stateful reassembler for one daemon connection.
///
/// After an error the parser is reset, but the stream position is lost;
/// the connection should be closed.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Header bytes collected so far for the next frame.
    header: Vec<u8>,
    /// Payload bytes still missing for the frame in progress.
    remaining: Option<usize>,
    /// Payload bytes collected so far.
    payload: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            header: Vec::with_capacity(HEADER_SIZE),
            remaining: None,
            payload: Vec::new(),
        }
    }

    /// `true` when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.remaining.is_none() && self.header.is_empty()
    }

    /// Feeds one chunk, invoking `on_message` once per completed message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for an invalid header length or an undecodable
    /// payload.  Messages completed earlier in the same chunk have already
    /// been delivered.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_message: F) -> Result<(), CodecError>
    where
        F: FnMut(MuxMessage),
    {
        let mut rest = chunk;

        while !rest.is_empty() {
            let remaining = match self.remaining {
                Some(n) => n,
                None => {
                    let wanted = HEADER_SIZE - self.header.len();
                    let take = wanted.min(rest.len());
                    self.header.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if self.header.len() < HEADER_SIZE {
                        break;
                    }

                    let decoded = decode_header(&self.header);
                    self.header.clear();
                    let (header, payload_len) = match decoded {
                        Ok(parts) => parts,
                        Err(e) => {
                            self.reset();
                            return Err(e);
                        }
                    };
                    trace!(length = header.length, tag = header.tag, "frame header");
                    self.payload.clear();
                    self.remaining = Some(payload_len);
                    payload_len
                }
            };

            let take = remaining.min(rest.len());
            self.payload.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            let left = remaining - take;
            if left > 0 {
                self.remaining = Some(left);
                break;
            }

            self.remaining = None;
            let decoded = decode_payload(&self.payload);
            self.payload.clear();
            match decoded {
                Ok(message) => on_message(message),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Like [`feed`](Self::feed), collecting the messages into a `Vec`.
    ///
    /// # Errors
    ///
    /// See [`feed`](Self::feed).  Messages completed before the error are
    /// discarded.
    pub fn feed_collect(&mut self, chunk: &[u8]) -> Result<Vec<MuxMessage>, CodecError> {
        let mut messages = Vec::new();
        self.feed(chunk, |m| messages.push(m))?;
        Ok(messages)
    }

    fn reset(&mut self) {
        self.header.clear();
        self.payload.clear();
        self.remaining = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::DeviceDescriptor;
    use crate::protocol::codec::encode_message;
    use crate::protocol::messages::{FrameHeader, ResultCode};

    fn attached(udid: &str, device_id: u32) -> MuxMessage {
        MuxMessage::Attached {
            device_id,
            device: DeviceDescriptor {
                connection_type: "USB".to_string(),
                device_id,
                location_id: Some(1),
                product_id: Some(2),
                serial_number: udid.to_string(),
            },
        }
    }

    #[test]
    fn test_whole_frame_in_one_chunk() {
        let msg = attached("ABC", 7);
        let bytes = encode_message(&msg).unwrap();
        let mut parser = FrameParser::new();
        assert_eq!(parser.feed_collect(&bytes).unwrap(), vec![msg]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_one_byte_chunks() {
        // Arrange
        let msg = attached("ABC", 7);
        let bytes = encode_message(&msg).unwrap();
        let mut parser = FrameParser::new();
        let mut out = Vec::new();

        // Act
        for b in &bytes {
            parser.feed(std::slice::from_ref(b), |m| out.push(m)).unwrap();
        }

        // Assert
        assert_eq!(out, vec![msg]);
    }

    #[test]
    fn test_two_frames_in_one_chunk_keep_order() {
        let first = MuxMessage::Result(ResultCode::OK);
        let second = attached("ABC", 7);
        let mut bytes = encode_message(&first).unwrap();
        bytes.extend_from_slice(&encode_message(&second).unwrap());

        let mut parser = FrameParser::new();
        assert_eq!(parser.feed_collect(&bytes).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_header_alone_then_payload() {
        // Arrange: a chunk that ends exactly at the end of the header
        let msg = MuxMessage::Detached { device_id: 3 };
        let bytes = encode_message(&msg).unwrap();
        let mut parser = FrameParser::new();

        // Act / Assert
        assert!(parser.feed_collect(&bytes[..HEADER_SIZE]).unwrap().is_empty());
        assert!(!parser.is_idle());
        assert_eq!(parser.feed_collect(&bytes[HEADER_SIZE..]).unwrap(), vec![msg]);
    }

    #[test]
    fn test_split_inside_header() {
        let msg = MuxMessage::Result(ResultCode(2));
        let bytes = encode_message(&msg).unwrap();
        let mut parser = FrameParser::new();
        assert!(parser.feed_collect(&bytes[..5]).unwrap().is_empty());
        assert_eq!(parser.feed_collect(&bytes[5..]).unwrap(), vec![msg]);
    }

    #[test]
    fn test_frame_tail_and_next_frame_head_in_one_chunk() {
        // Arrange
        let a = attached("A", 1);
        let b = attached("B", 2);
        let mut bytes = encode_message(&a).unwrap();
        let a_len = bytes.len();
        bytes.extend_from_slice(&encode_message(&b).unwrap());
        let mut parser = FrameParser::new();

        // Act: straddle the boundary between the two frames
        let first = parser.feed_collect(&bytes[..a_len - 4]).unwrap();
        let second = parser.feed_collect(&bytes[a_len - 4..a_len + 6]).unwrap();
        let third = parser.feed_collect(&bytes[a_len + 6..]).unwrap();

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec![a]);
        assert_eq!(third, vec![b]);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut parser = FrameParser::new();
        assert!(parser.feed_collect(&[]).unwrap().is_empty());
        assert!(parser.is_idle());
    }

    #[test]
    fn test_invalid_length_is_error_and_resets() {
        let mut parser = FrameParser::new();
        let bad = FrameHeader::outbound(4).to_bytes();
        assert_eq!(
            parser.feed_collect(&bad),
            Err(CodecError::InvalidLength { length: 4 })
        );
        assert!(parser.is_idle());
    }

    #[test]
    fn test_undecodable_payload_is_error() {
        let garbage = b"definitely not xml";
        let mut frame = FrameHeader::outbound((HEADER_SIZE + garbage.len()) as u32)
            .to_bytes()
            .to_vec();
        frame.extend_from_slice(garbage);

        let mut parser = FrameParser::new();
        assert!(matches!(parser.feed_collect(&frame), Err(CodecError::Decode(_))));
        assert!(parser.is_idle());
    }
}
