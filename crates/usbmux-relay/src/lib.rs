//! usbmux-relay library crate.
//!
//! A client for usbmuxd, the daemon that multiplexes TCP-like connections to
//! USB-attached mobile devices, plus a relay that exposes a device port as a
//! local TCP port.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! local client (TCP)
//!         ↕
//! [usbmux-relay]
//!   ├── domain/           Plain types: DaemonAddress, options, MuxError, events
//!   ├── application/      MuxClient, device finder, get-tunnel
//!   └── infrastructure/
//!         ├── transport/  DaemonConnector seam, exact frame reads
//!         ├── listener/   Listen connection → device registry
//!         ├── tunnel/     Connect negotiation
//!         ├── relay/      local acceptor + splice
//!         └── config_file/ TOML configuration
//!         ↕
//! usbmuxd (16-byte header + XML plist, usbmux-core codec)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `infrastructure` owns every socket and every spawned task.
//! - `application` composes infrastructure components into the operations a
//!   caller uses.

/// Domain layer: configuration, errors and events (no I/O).
pub mod domain;

/// Application layer: the client façade and the device finder.
pub mod application;

/// Infrastructure layer: daemon connections, listener, tunnels, relay.
pub mod infrastructure;

pub use application::MuxClient;
pub use domain::{
    DaemonAddress, FindOptions, ListenerEvent, ListenerState, MuxError, RelayEvent, RelayOptions,
};
pub use infrastructure::{DaemonConnector, DaemonStream, Listener, Relay};
