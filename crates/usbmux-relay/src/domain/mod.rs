//! Domain layer for usbmux-relay.
//!
//! Plain types with no I/O: where the daemon lives, how long to wait for a
//! device, the error taxonomy, and the events the long-lived components
//! report.  Nothing here touches `tokio`.

pub mod config;
pub mod error;
pub mod events;

pub use config::{
    AddressParseError, DaemonAddress, FindOptions, RelayOptions, SOCKET_ADDRESS_ENV,
};
pub use error::MuxError;
pub use events::{ListenerEvent, ListenerState, RelayEvent, EVENT_CHANNEL_CAPACITY};
