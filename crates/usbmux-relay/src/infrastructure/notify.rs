//! Non-blocking event delivery.
//!
//! Every component reports events with `try_send`.  A consumer that stops
//! reading loses events; it never stalls a splice or a registry update.

use std::fmt;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::warn;

/// Queues `event` if there is room, otherwise drops it with a warning.
/// A dropped receiver is not an error.
pub(crate) fn emit<E: fmt::Debug>(events: &Sender<E>, event: E) {
    match events.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            warn!(?event, "event channel full; dropping event");
        }
    }
}
