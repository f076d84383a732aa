//! # usbmux-core
//!
//! Shared library for talking to the usbmuxd daemon: the wire codec, the
//! incremental frame parser, and the registry of attached devices.
//!
//! This crate performs no I/O.  Sockets, tasks and the relay live in
//! `usbmux-relay`.
//!
//! - **`protocol`** – 16-byte little-endian header plus XML plist body.
//!   [`protocol::codec`] builds outbound `Listen`/`Connect` frames and decodes
//!   inbound payloads; [`protocol::parser::FrameParser`] reassembles frames
//!   from arbitrary read chunks.
//!
//! - **`domain`** – [`DeviceDescriptor`] and the ordered [`DeviceRegistry`]
//!   keyed by UDID, plus the [`SharedRegistry`]/[`RegistryWriter`] pair that
//!   lets many readers observe what one listener writes.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceDescriptor, DeviceId, Udid};
pub use domain::registry::{
    pin_matches, ConnectivityError, DeviceRegistry, RegistryWriter, SharedRegistry,
};
pub use protocol::codec::{build_connect_frame, decode_payload, listen_frame, CodecError};
pub use protocol::messages::{MuxMessage, ResultCode};
pub use protocol::parser::FrameParser;
