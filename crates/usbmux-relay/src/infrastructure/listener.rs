//! The long-lived notification channel to usbmuxd.
//!
//! A listener opens one daemon connection, sends `Listen`, and from then on
//! receives an `Attached`/`Detached` notification whenever a device comes or
//! goes.  It is the only component that writes to the device registry.
//!
//! # Message handling
//!
//! | Message     | State               | Effect                                          |
//! |-------------|---------------------|-------------------------------------------------|
//! | `Result` 0  | `AwaitingListenAck` | → `Listening`                                   |
//! | `Result` ≠0 | `AwaitingListenAck` | emit `Error(Protocol)`, close, → `Errored`      |
//! | `Attached`  | `Listening`         | upsert by UDID, emit `Attached(udid)`           |
//! | `Detached`  | `Listening`         | look up UDID by handle, emit `Detached`, remove |
//!
//! Anything else is logged and ignored.  When the daemon closes the
//! connection the listener emits `Closed`; a socket or frame error emits
//! `Error`.  There is no reconnection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use usbmux_core::protocol::codec::listen_frame;
use usbmux_core::{FrameParser, MuxMessage, RegistryWriter, Udid};

use crate::domain::{ListenerEvent, ListenerState, MuxError, EVENT_CHANNEL_CAPACITY};
use crate::infrastructure::notify::emit;
use crate::infrastructure::transport::{write_frame, SharedConnector};

/// Size of each socket read.  Notifications are a few hundred bytes.
const READ_BUFFER_SIZE: usize = 4096;

// ── Public API ────────────────────────────────────────────────────────────────

/// Handle to a running listener task.
///
/// Dropping the handle closes the daemon connection.
#[derive(Debug)]
pub struct Listener {
    state: Arc<watch::Sender<ListenerState>>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Starts a listener that records devices through `writer`.
    ///
    /// Returns immediately; connecting and the `Listen` handshake happen on
    /// the spawned task.  Events arrive on the returned receiver; when it is
    /// full, new events are dropped and the registry is still updated.
    pub fn open(
        connector: SharedConnector,
        writer: RegistryWriter,
    ) -> (Self, mpsc::Receiver<ListenerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(watch::channel(ListenerState::Connecting).0);

        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            match connector.connect().await {
                Ok(stream) => run_session(stream, &writer, &task_state, &events_tx).await,
                Err(e) => {
                    warn!(error = %e, "listener could not reach usbmuxd");
                    task_state.send_replace(ListenerState::Errored);
                    emit(&events_tx, ListenerEvent::Error(e.into()));
                }
            }
        });

        (Self { state, task }, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Tears the daemon connection down.  Idempotent.
    pub fn close(&self) {
        self.task.abort();
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ListenerState::Closed;
                true
            }
        });
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Runs the listener protocol over an established connection until it ends,
/// then reports the outcome.  The connection is dropped on return.
pub(crate) async fn run_session<S>(
    mut stream: S,
    writer: &RegistryWriter,
    state: &watch::Sender<ListenerState>,
    events: &mpsc::Sender<ListenerEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match drive(&mut stream, writer, state, events).await {
        Ok(()) => {
            info!("usbmuxd closed the listener connection");
            state.send_replace(ListenerState::Closed);
            emit(events, ListenerEvent::Closed);
        }
        Err(e) => {
            warn!(error = %e, "listener failed");
            state.send_replace(ListenerState::Errored);
            emit(events, ListenerEvent::Error(e));
        }
    }
}

/// Handshake plus read loop.  `Ok` means the daemon closed the connection.
async fn drive<S>(
    stream: &mut S,
    writer: &RegistryWriter,
    state: &watch::Sender<ListenerState>,
    events: &mpsc::Sender<ListenerEvent>,
) -> Result<(), MuxError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = listen_frame()?;
    state.send_replace(ListenerState::AwaitingListenAck);
    write_frame(stream, frame).await?;
    debug!("sent Listen request");

    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        // Messages completed before a decode error are still applied.
        let mut decoded = Vec::new();
        let parsed = parser.feed(&buf[..n], |msg| decoded.push(msg));

        for msg in decoded {
            match apply_message(msg, writer, state)? {
                Applied::Nothing => {}
                Applied::Emit(event) => emit(events, event),
                Applied::EmitThenRemove(event, udid) => {
                    emit(events, event);
                    writer.remove(&udid);
                }
            }
        }
        parsed?;
    }
}

/// What the read loop must do after a message was applied.
#[derive(Debug)]
enum Applied {
    Nothing,
    Emit(ListenerEvent),
    /// Emit, then drop the UDID from the registry.
    EmitThenRemove(ListenerEvent, Udid),
}

/// Applies one decoded message to the listener state and the registry.
///
/// Returns an error only for a rejected `Listen`.
fn apply_message(
    msg: MuxMessage,
    writer: &RegistryWriter,
    state: &watch::Sender<ListenerState>,
) -> Result<Applied, MuxError> {
    let current = *state.borrow();

    match msg {
        MuxMessage::Result(code) if current == ListenerState::AwaitingListenAck => {
            if !code.is_ok() {
                return Err(MuxError::Protocol(code));
            }
            info!("usbmuxd accepted Listen; waiting for devices");
            state.send_replace(ListenerState::Listening);
            Ok(Applied::Nothing)
        }
        MuxMessage::Attached { device, .. } if current == ListenerState::Listening => {
            let udid = device.serial_number.clone();
            info!(
                udid = %udid,
                device_id = device.device_id,
                connection = %device.connection_type,
                "device attached"
            );
            writer.upsert(device);
            Ok(Applied::Emit(ListenerEvent::Attached(udid)))
        }
        MuxMessage::Detached { device_id } if current == ListenerState::Listening => {
            let udid = writer.read(|r| {
                r.find_by_device_id(device_id)
                    .map(|d| d.serial_number.clone())
            });
            match udid {
                Some(udid) => {
                    info!(udid = %udid, device_id, "device detached");
                    Ok(Applied::EmitThenRemove(
                        ListenerEvent::Detached(udid.clone()),
                        udid,
                    ))
                }
                None => {
                    debug!(device_id, "detach for unknown session handle");
                    Ok(Applied::Nothing)
                }
            }
        }
        other => {
            debug!(message_type = other.message_type(), state = ?current, "ignoring message");
            Ok(Applied::Nothing)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
