//! Waiting for a device, and the tunnel helper built on it.
//!
//! [`find_device`] opens its own listener over a private registry and races a
//! deadline against the first qualifying `Attached`.  Listener failures
//! during the wait are logged, not returned: only the deadline ends an
//! unsuccessful search.

use std::sync::Arc;

use tracing::{debug, info, warn};

use usbmux_core::{pin_matches, ConnectivityError, DeviceId, SharedRegistry};

use crate::domain::{FindOptions, ListenerEvent, MuxError};
use crate::infrastructure::listener::Listener;
use crate::infrastructure::transport::{DaemonStream, SharedConnector};
use crate::infrastructure::tunnel;

/// Waits up to `options.timeout` for a device satisfying `options.udid` and
/// returns its current session handle.
///
/// # Errors
///
/// [`ConnectivityError::NoDevices`] (unpinned) or
/// [`ConnectivityError::DeviceNotConnected`] (pinned) when the deadline
/// passes first.
pub async fn find_device(
    connector: SharedConnector,
    options: &FindOptions,
) -> Result<DeviceId, MuxError> {
    let pin = options.pin();
    let scratch = SharedRegistry::new();
    let (listener, mut events) = Listener::open(connector, scratch.writer());

    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            () = &mut deadline => {
                break Err(ConnectivityError::for_pin(pin).into());
            }
            event = events.recv() => match event {
                Some(ListenerEvent::Attached(udid)) if pin_matches(pin, &udid) => {
                    if let Some(device_id) = scratch.read(|r| r.get(&udid).map(|d| d.device_id)) {
                        info!(udid = %udid, device_id, "found device");
                        break Ok(device_id);
                    }
                }
                Some(ListenerEvent::Error(e)) => {
                    warn!(error = %e, "listener error while waiting for a device");
                }
                Some(other) => debug!(event = ?other, "still waiting for a device"),
                None => {
                    // Listener is gone; nothing can arrive before the deadline.
                    (&mut deadline).await;
                    break Err(ConnectivityError::for_pin(pin).into());
                }
            }
        }
    };

    listener.close();
    outcome
}

/// Opens a tunnel to `port` on a qualifying device.
///
/// Uses the device already in `registry` when one qualifies; otherwise waits
/// for one with [`find_device`].
///
/// # Errors
///
/// Anything [`find_device`] or [`tunnel::connect`] can return.
pub async fn get_tunnel(
    connector: SharedConnector,
    registry: &SharedRegistry,
    port: u16,
    options: &FindOptions,
) -> Result<DaemonStream, MuxError> {
    let device_id = match registry.select(options.pin()) {
        Ok(device) => device.device_id,
        Err(_) => find_device(Arc::clone(&connector), options).await?,
    };
    tunnel::connect(connector.as_ref(), device_id, port).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
