//! Frame builder and payload decoder for the usbmuxd protocol.
//!
//! Wire format:
//! ```text
//! [length:4][version:4][request:4][tag:4][xml plist: length - 16]
//! ```
//! Header fields are little-endian.  Outbound frames always carry
//! version 1, request 8, tag 1.

use std::sync::OnceLock;

use serde::Serialize;
use thiserror::Error;

use crate::domain::device::DeviceId;
use crate::protocol::messages::{
    message_type, AttachedPayload, ConnectRequest, DetachedPayload, Envelope, FrameHeader,
    ListenRequest, MuxMessage, ResultCode, ResultPayload, CLIENT_VERSION_STRING, HEADER_SIZE,
    MAX_FRAME_LEN, PROG_NAME,
};

/// Errors that can occur while building or decoding frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The byte slice is shorter than a frame header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The header's length field is smaller than the header itself.
    #[error("invalid frame length {length}: shorter than the {HEADER_SIZE}-byte header")]
    InvalidLength { length: u32 },

    /// The header's length field exceeds [`MAX_FRAME_LEN`].
    #[error("frame length {length} exceeds the {max}-byte limit")]
    FrameTooLarge { length: usize, max: usize },

    /// The payload could not be serialized as a plist.
    #[error("failed to encode plist payload: {0}")]
    Encode(String),

    /// The payload is not a plist, or does not match the schema its
    /// `MessageType` selects.
    #[error("malformed plist payload: {0}")]
    Decode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes `payload` as an XML plist and prepends the 16-byte header.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails and
/// [`CodecError::FrameTooLarge`] if the result would exceed [`MAX_FRAME_LEN`].
///
/// # Examples
///
/// ```rust
/// use usbmux_core::protocol::codec::pack;
/// use usbmux_core::protocol::messages::{ListenRequest, HEADER_SIZE};
///
/// let frame = pack(&ListenRequest::default()).unwrap();
/// let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
/// assert_eq!(length, frame.len());
/// assert!(frame.len() > HEADER_SIZE);
/// ```
pub fn pack<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    plist::to_writer_xml(&mut body, payload).map_err(|e| CodecError::Encode(e.to_string()))?;

    let total = HEADER_SIZE + body.len();
    if total > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            length: total,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(total);
    // `total` is bounded by MAX_FRAME_LEN, which fits in a u32.
    frame.extend_from_slice(&FrameHeader::outbound(total as u32).to_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Builds the `Connect` frame that asks the daemon to open a tunnel to `port`
/// on the device with session handle `device_id`.
///
/// The daemon expects `PortNumber` in network byte order while the header is
/// little-endian, so the port's two bytes are swapped before encoding: port
/// 22 (`0x0016`) is sent as 5632 (`0x1600`).
///
/// # Errors
///
/// Returns [`CodecError`] if the payload cannot be serialized.
pub fn build_connect_frame(device_id: DeviceId, port: u16) -> Result<Vec<u8>, CodecError> {
    pack(&ConnectRequest {
        message_type: message_type::CONNECT.to_string(),
        client_version_string: CLIENT_VERSION_STRING.to_string(),
        prog_name: PROG_NAME.to_string(),
        device_id,
        port_number: port.swap_bytes(),
    })
}

static LISTEN_FRAME: OnceLock<Result<Vec<u8>, CodecError>> = OnceLock::new();

/// The constant `Listen` frame, built once per process.
///
/// # Errors
///
/// Returns [`CodecError`] if the payload cannot be serialized.
pub fn listen_frame() -> Result<&'static [u8], CodecError> {
    LISTEN_FRAME
        .get_or_init(|| pack(&ListenRequest::default()))
        .as_deref()
        .map_err(Clone::clone)
}

/// Parses the frame header at the start of `bytes` and returns the payload
/// length it announces.
///
/// # Errors
///
/// Returns [`CodecError::InsufficientData`] when fewer than 16 bytes are
/// available, or a length error for out-of-range length fields.
pub fn decode_header(bytes: &[u8]) -> Result<(FrameHeader, usize), CodecError> {
    let raw: &[u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(CodecError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;
    let header = FrameHeader::from_bytes(raw);
    let length = header.length as usize;
    if length < HEADER_SIZE {
        return Err(CodecError::InvalidLength {
            length: header.length,
        });
    }
    if length > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            length,
            max: MAX_FRAME_LEN,
        });
    }
    Ok((header, length - HEADER_SIZE))
}

/// Decodes a plist payload (without header) into a [`MuxMessage`].
///
/// Unknown `MessageType` values decode to [`MuxMessage::Unrecognized`].
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the payload is not a plist dictionary
/// with a `MessageType`, or the fields do not match that type's schema.
pub fn decode_payload(payload: &[u8]) -> Result<MuxMessage, CodecError> {
    let envelope: Envelope = from_plist(payload)?;
    match envelope.message_type.as_str() {
        message_type::RESULT => {
            let result: ResultPayload = from_plist(payload)?;
            Ok(MuxMessage::Result(ResultCode(result.number)))
        }
        message_type::ATTACHED => {
            let attached: AttachedPayload = from_plist(payload)?;
            Ok(MuxMessage::Attached {
                device_id: attached.device_id,
                device: attached.properties,
            })
        }
        message_type::DETACHED => {
            let detached: DetachedPayload = from_plist(payload)?;
            Ok(MuxMessage::Detached {
                device_id: detached.device_id,
            })
        }
        _ => Ok(MuxMessage::Unrecognized {
            message_type: envelope.message_type,
        }),
    }
}

/// Encodes an inbound-direction message as the daemon would send it.
///
/// The client never sends these; this exists for daemon stand-ins in tests
/// and benchmarks.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] for [`MuxMessage::Unrecognized`], which has
/// no schema, or if serialization fails.
pub fn encode_message(msg: &MuxMessage) -> Result<Vec<u8>, CodecError> {
    match msg {
        MuxMessage::Result(code) => pack(&ResultPayload {
            message_type: message_type::RESULT.to_string(),
            number: code.0,
        }),
        MuxMessage::Attached { device_id, device } => pack(&AttachedPayload {
            message_type: message_type::ATTACHED.to_string(),
            device_id: *device_id,
            properties: device.clone(),
        }),
        MuxMessage::Detached { device_id } => pack(&DetachedPayload {
            message_type: message_type::DETACHED.to_string(),
            device_id: *device_id,
        }),
        MuxMessage::Unrecognized { message_type } => Err(CodecError::Encode(format!(
            "no schema for message type {message_type:?}"
        ))),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn from_plist<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    plist::from_bytes(payload).map_err(|e| CodecError::Decode(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::DeviceDescriptor;

    fn sample_device() -> DeviceDescriptor {
        DeviceDescriptor {
            connection_type: "USB".to_string(),
            device_id: 7,
            location_id: Some(0x1410_0000),
            product_id: Some(0x12a8),
            serial_number: "ABC".to_string(),
        }
    }

    fn body(frame: &[u8]) -> &[u8] {
        &frame[HEADER_SIZE..]
    }

    // ── pack ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_pack_length_field_is_header_plus_payload() {
        let frame = pack(&ListenRequest::default()).unwrap();
        let (header, payload_len) = decode_header(&frame).unwrap();
        assert_eq!(header.length as usize, frame.len());
        assert_eq!(payload_len, frame.len() - HEADER_SIZE);
    }

    #[test]
    fn test_pack_uses_fixed_outbound_header_fields() {
        let frame = pack(&ListenRequest::default()).unwrap();
        let (header, _) = decode_header(&frame).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.request, 8);
        assert_eq!(header.tag, 1);
    }

    #[test]
    fn test_pack_body_is_xml_plist() {
        let frame = pack(&ListenRequest::default()).unwrap();
        let text = std::str::from_utf8(body(&frame)).unwrap();
        assert!(text.starts_with("<?xml"), "payload must be an XML plist: {text}");
        assert!(text.contains("<string>Listen</string>"));
    }

    // ── Connect frame ────────────────────────────────────────────────────────

    #[test]
    fn test_connect_frame_swaps_port_bytes() {
        // Arrange / Act
        let frame = build_connect_frame(7, 22).unwrap();
        let req: ConnectRequest = plist::from_bytes(body(&frame)).unwrap();

        // Assert: 0x0016 goes out as 0x1600
        assert_eq!(req.port_number, 0x1600);
        assert_eq!(req.port_number, 22u16.swap_bytes());
        assert_eq!(req.device_id, 7);
        assert_eq!(req.message_type, "Connect");
    }

    #[test]
    fn test_connect_frame_port_swap_for_asymmetric_port() {
        let frame = build_connect_frame(1, 0x1F90).unwrap(); // 8080
        let req: ConnectRequest = plist::from_bytes(body(&frame)).unwrap();
        assert_eq!(req.port_number, 0x901F);
    }

    #[test]
    fn test_connect_frame_carries_client_identification() {
        let frame = build_connect_frame(3, 62078).unwrap();
        let req: ConnectRequest = plist::from_bytes(body(&frame)).unwrap();
        assert_eq!(req.prog_name, PROG_NAME);
        assert_eq!(req.client_version_string, CLIENT_VERSION_STRING);
    }

    // ── Listen frame ─────────────────────────────────────────────────────────

    #[test]
    fn test_listen_frame_is_stable_across_calls() {
        let first = listen_frame().unwrap();
        let second = listen_frame().unwrap();
        assert_eq!(first.as_ptr(), second.as_ptr(), "listen frame must be built once");
        let req: ListenRequest = plist::from_bytes(body(first)).unwrap();
        assert_eq!(req, ListenRequest::default());
    }

    // ── decode_header ────────────────────────────────────────────────────────

    #[test]
    fn test_decode_header_rejects_short_input() {
        let result = decode_header(&[0u8; 10]);
        assert_eq!(
            result,
            Err(CodecError::InsufficientData {
                needed: 16,
                available: 10
            })
        );
    }

    #[test]
    fn test_decode_header_rejects_length_below_header_size() {
        let bytes = FrameHeader::outbound(8).to_bytes();
        assert_eq!(decode_header(&bytes), Err(CodecError::InvalidLength { length: 8 }));
    }

    #[test]
    fn test_decode_header_rejects_oversized_frame() {
        let bytes = FrameHeader::outbound(u32::MAX).to_bytes();
        assert!(matches!(
            decode_header(&bytes),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    // ── decode_payload ───────────────────────────────────────────────────────

    #[test]
    fn test_decode_result_payload() {
        let frame = encode_message(&MuxMessage::Result(ResultCode(3))).unwrap();
        assert_eq!(
            decode_payload(body(&frame)).unwrap(),
            MuxMessage::Result(ResultCode::PORT_UNAVAILABLE)
        );
    }

    #[test]
    fn test_decode_attached_payload() {
        let msg = MuxMessage::Attached {
            device_id: 7,
            device: sample_device(),
        };
        let frame = encode_message(&msg).unwrap();
        assert_eq!(decode_payload(body(&frame)).unwrap(), msg);
    }

    #[test]
    fn test_decode_attached_without_optional_properties() {
        // Network-attached devices carry no LocationID / ProductID.
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0"><dict>
<key>MessageType</key><string>Attached</string>
<key>DeviceID</key><integer>12</integer>
<key>Properties</key><dict>
<key>ConnectionType</key><string>Network</string>
<key>DeviceID</key><integer>12</integer>
<key>SerialNumber</key><string>NET-1</string>
</dict></dict></plist>"#;
        let msg = decode_payload(xml).unwrap();
        match msg {
            MuxMessage::Attached { device_id, device } => {
                assert_eq!(device_id, 12);
                assert_eq!(device.serial_number, "NET-1");
                assert_eq!(device.location_id, None);
                assert_eq!(device.product_id, None);
            }
            other => panic!("expected Attached, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_detached_payload() {
        let frame = encode_message(&MuxMessage::Detached { device_id: 9 }).unwrap();
        assert_eq!(
            decode_payload(body(&frame)).unwrap(),
            MuxMessage::Detached { device_id: 9 }
        );
    }

    #[test]
    fn test_decode_unknown_message_type_is_unrecognized() {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Paired {
            message_type: String,
            #[serde(rename = "DeviceID")]
            device_id: u32,
        }
        let frame = pack(&Paired {
            message_type: "Paired".to_string(),
            device_id: 1,
        })
        .unwrap();
        assert_eq!(
            decode_payload(body(&frame)).unwrap(),
            MuxMessage::Unrecognized {
                message_type: "Paired".to_string()
            }
        );
    }

    #[test]
    fn test_decode_garbage_payload_is_error() {
        assert!(matches!(
            decode_payload(b"not a plist at all"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_result_missing_number_is_error() {
        #[derive(Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Bare {
            message_type: String,
        }
        let frame = pack(&Bare {
            message_type: "Result".to_string(),
        })
        .unwrap();
        assert!(matches!(decode_payload(body(&frame)), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_encode_unrecognized_is_error() {
        let msg = MuxMessage::Unrecognized {
            message_type: "Paired".to_string(),
        };
        assert!(matches!(encode_message(&msg), Err(CodecError::Encode(_))));
    }
}
