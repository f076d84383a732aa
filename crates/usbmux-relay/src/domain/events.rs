//! Events emitted by the long-lived components.
//!
//! The listener and the relay never return errors once started; everything
//! that happens to them is reported on a bounded `tokio::sync::mpsc` channel
//! returned alongside the component.  Delivery never waits: when the
//! channel is full the event is dropped, so a slow consumer cannot stall
//! forwarding or registry updates.

use usbmux_core::Udid;

use crate::domain::error::MuxError;

/// Capacity of every event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a listener connection.
///
/// ```text
/// Connecting ──► AwaitingListenAck ──(Result 0)──► Listening ──► Closed
///      │                 │                             │
///      └─────────────────┴──(error / Result ≠ 0)───────┴──────► Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    AwaitingListenAck,
    Listening,
    Closed,
    Errored,
}

impl ListenerState {
    /// `true` once the listener can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerState::Closed | ListenerState::Errored)
    }
}

/// Reported by a listener.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A device with this UDID attached (or its descriptor was refreshed).
    Attached(Udid),
    /// A device with this UDID detached.
    Detached(Udid),
    /// The listener failed and stopped.
    Error(MuxError),
    /// The daemon closed the connection.
    Closed,
}

/// Reported by a relay.
#[derive(Debug)]
pub enum RelayEvent {
    /// The first device satisfying the relay's pin attached.  Emitted once.
    Ready(Udid),
    /// No qualifying device appeared within the discovery timeout.
    /// The relay keeps running.
    Warning(MuxError),
    Attached(Udid),
    Detached(Udid),
    /// A listener failure, a local connection with no device to forward to,
    /// or a tunnel that could not be opened.
    Error(MuxError),
    /// A local connection was spliced onto a device tunnel.
    Connect,
    /// A spliced local connection ended.
    Disconnect,
    /// The relay was stopped.
    Close,
}
