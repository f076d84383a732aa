//! `MuxClient`: the composition root.
//!
//! A client owns one [`DaemonConnector`] and one device registry, and hands
//! them to the components it creates.  Listeners and relays started from the
//! same client write to and read from the same registry; separate clients
//! never share state.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use usbmux_core::{DeviceId, SharedRegistry};

use crate::application::finder;
use crate::domain::{
    AddressParseError, DaemonAddress, FindOptions, ListenerEvent, MuxError, RelayEvent,
    RelayOptions,
};
use crate::infrastructure::listener::Listener;
use crate::infrastructure::relay::Relay;
use crate::infrastructure::transport::{DaemonConnector, DaemonStream, SharedConnector};
use crate::infrastructure::tunnel;

/// Entry point for every usbmuxd operation.
///
/// # Example
///
/// ```no_run
/// use usbmux_relay::{FindOptions, MuxClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = MuxClient::from_env()?;
/// let tunnel = client.get_tunnel(62078, &FindOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MuxClient {
    connector: SharedConnector,
    registry: SharedRegistry,
}

impl MuxClient {
    /// A client for the daemon reachable through `connector`.
    pub fn new(connector: impl DaemonConnector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: SharedConnector) -> Self {
        Self {
            connector,
            registry: SharedRegistry::new(),
        }
    }

    /// A client for the platform default address or `USBMUXD_SOCKET_ADDRESS`.
    ///
    /// # Errors
    ///
    /// [`AddressParseError`] if the environment variable is malformed.
    pub fn from_env() -> Result<Self, AddressParseError> {
        Ok(Self::new(DaemonAddress::from_env()?))
    }

    /// Read access to the devices this client's listeners have seen.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Starts a listener that keeps [`MuxClient::registry`] current.
    pub fn open_listener(&self) -> (Listener, mpsc::Receiver<ListenerEvent>) {
        Listener::open(Arc::clone(&self.connector), self.registry.writer())
    }

    /// Opens a tunnel to `port` on the device with session handle `device_id`.
    ///
    /// # Errors
    ///
    /// See [`tunnel::connect`].
    pub async fn connect(&self, device_id: DeviceId, port: u16) -> Result<DaemonStream, MuxError> {
        tunnel::connect(self.connector.as_ref(), device_id, port).await
    }

    /// Waits for a qualifying device and returns its session handle.
    ///
    /// The search runs on its own listener and registry: the device it finds
    /// does not appear in [`MuxClient::registry`] afterwards.
    ///
    /// # Errors
    ///
    /// See [`finder::find_device`].
    pub async fn find_device(&self, options: &FindOptions) -> Result<DeviceId, MuxError> {
        finder::find_device(Arc::clone(&self.connector), options).await
    }

    /// Opens a tunnel to `port` on a qualifying device, waiting for one if
    /// the registry has none.
    ///
    /// # Errors
    ///
    /// See [`finder::get_tunnel`].
    pub async fn get_tunnel(
        &self,
        port: u16,
        options: &FindOptions,
    ) -> Result<DaemonStream, MuxError> {
        finder::get_tunnel(Arc::clone(&self.connector), &self.registry, port, options).await
    }

    /// Starts a relay from `127.0.0.1:relay_port` to `device_port`.
    ///
    /// # Errors
    ///
    /// See [`Relay::start`].
    pub async fn relay(
        &self,
        device_port: u16,
        relay_port: u16,
        options: RelayOptions,
    ) -> Result<(Relay, mpsc::Receiver<RelayEvent>), MuxError> {
        Relay::start(
            Arc::clone(&self.connector),
            self.registry.writer(),
            device_port,
            relay_port,
            options,
        )
        .await
    }
}

impl fmt::Debug for MuxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxClient")
            .field("devices", &self.registry.read(|r| r.udids()))
            .finish_non_exhaustive()
    }
}
