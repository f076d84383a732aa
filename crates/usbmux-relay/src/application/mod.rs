//! Application layer for usbmux-relay.
//!
//! Use cases composed from the infrastructure components: waiting for a
//! device, opening a tunnel to whichever device qualifies, and the
//! [`MuxClient`] that wires a connector and a registry into all of them.

pub mod client;
pub mod finder;

pub use client::MuxClient;
pub use finder::{find_device, get_tunnel};
