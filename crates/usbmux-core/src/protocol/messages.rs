//! usbmuxd wire protocol message types.
//!
//! Every frame exchanged with the daemon is a fixed 16-byte header followed by
//! an XML property list.  The plist dictionary always carries a `MessageType`
//! string that discriminates the payload schema.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::device::{DeviceDescriptor, DeviceId};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Header `version` field.  Version 1 means "plist payload".
pub const PROTOCOL_VERSION: u32 = 1;

/// Header `request` field for plist messages.
pub const REQUEST_PLIST: u32 = 8;

/// Header `tag` field used on every outbound frame.
pub const DEFAULT_TAG: u32 = 1;

/// Upper bound on a single frame, header included.
///
/// The daemon's largest messages (device lists) are a few kilobytes; anything
/// past this limit is treated as a corrupt length field.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// `ClientVersionString` advertised in every request.
pub const CLIENT_VERSION_STRING: &str = concat!("usbmux-relay-", env!("CARGO_PKG_VERSION"));

/// `ProgName` advertised in every request.
pub const PROG_NAME: &str = "usbmux-relay";

/// `MessageType` discriminator values.
pub mod message_type {
    pub const LISTEN: &str = "Listen";
    pub const CONNECT: &str = "Connect";
    pub const RESULT: &str = "Result";
    pub const ATTACHED: &str = "Attached";
    pub const DETACHED: &str = "Detached";
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// The 16-byte frame header.  All fields are little-endian `u32`s.
///
/// ```text
/// [length:4][version:4][request:4][tag:4][plist payload: length - 16]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length, header included.
    pub length: u32,
    pub version: u32,
    pub request: u32,
    pub tag: u32,
}

impl FrameHeader {
    /// Header for an outbound frame of `length` total bytes.
    pub fn outbound(length: u32) -> Self {
        Self {
            length,
            version: PROTOCOL_VERSION,
            request: REQUEST_PLIST,
            tag: DEFAULT_TAG,
        }
    }

    /// Serializes the header into its 16-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.request.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tag.to_le_bytes());
        buf
    }

    /// Reads a header from exactly [`HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let field = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            length: field(0),
            version: field(4),
            request: field(8),
            tag: field(12),
        }
    }
}

// ── Result codes ──────────────────────────────────────────────────────────────

/// The `Number` carried by a `Result` message.  Zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u64);

impl ResultCode {
    pub const OK: ResultCode = ResultCode(0);
    pub const DEVICE_NOT_CONNECTED: ResultCode = ResultCode(2);
    pub const PORT_UNAVAILABLE: ResultCode = ResultCode(3);
    pub const MALFORMED_REQUEST: ResultCode = ResultCode(5);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Human-readable meaning for the codes the daemon documents.
    pub fn description(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("success"),
            2 => Some("device requested is not connected"),
            3 => Some("port requested is unavailable"),
            5 => Some("malformed request"),
            _ => None,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "code {} ({text})", self.0),
            None => write!(f, "code {}", self.0),
        }
    }
}

// ── Plist payload schemas ─────────────────────────────────────────────────────

/// Outbound `Listen` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenRequest {
    pub message_type: String,
    pub client_version_string: String,
    pub prog_name: String,
}

impl Default for ListenRequest {
    fn default() -> Self {
        Self {
            message_type: message_type::LISTEN.to_string(),
            client_version_string: CLIENT_VERSION_STRING.to_string(),
            prog_name: PROG_NAME.to_string(),
        }
    }
}

/// Outbound `Connect` request.
///
/// `port_number` holds the port with its two bytes swapped; see
/// [`crate::protocol::codec::build_connect_frame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectRequest {
    pub message_type: String,
    pub client_version_string: String,
    pub prog_name: String,
    #[serde(rename = "DeviceID")]
    pub device_id: DeviceId,
    pub port_number: u16,
}

/// Inbound `Result` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultPayload {
    pub message_type: String,
    pub number: u64,
}

/// Inbound `Attached` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachedPayload {
    pub message_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: DeviceId,
    pub properties: DeviceDescriptor,
}

/// Inbound `Detached` notification.  Only the session handle is carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetachedPayload {
    pub message_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: DeviceId,
}

/// Just the discriminator, used to pick the schema for the second pass.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "MessageType")]
    pub message_type: String,
}

// ── Decoded messages ──────────────────────────────────────────────────────────

/// A fully decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxMessage {
    /// Reply to a `Listen` or `Connect` request.
    Result(ResultCode),
    /// A device was attached.  `device_id` is the session handle.
    Attached {
        device_id: DeviceId,
        device: DeviceDescriptor,
    },
    /// A device was detached.
    Detached { device_id: DeviceId },
    /// A `MessageType` this client does not act on (e.g. `Paired`).
    Unrecognized { message_type: String },
}

impl MuxMessage {
    /// The `MessageType` string this message was decoded from.
    pub fn message_type(&self) -> &str {
        match self {
            MuxMessage::Result(_) => message_type::RESULT,
            MuxMessage::Attached { .. } => message_type::ATTACHED,
            MuxMessage::Detached { .. } => message_type::DETACHED,
            MuxMessage::Unrecognized { message_type } => message_type,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
