//! Local TCP relay: forwards every accepted connection to a port on a device.
//!
//! A relay is three cooperating tasks:
//!
//! 1. **Listener** keeps the device registry current (see
//!    [`crate::infrastructure::listener`]).
//! 2. **Supervisor** turns listener events into relay events, runs the
//!    one-shot discovery watchdog, and emits `Ready` once.
//! 3. **Acceptor** accepts local connections and spawns one task per
//!    connection that picks a device, opens a tunnel, and splices bytes in
//!    both directions.
//!
//! ```text
//! local client ──► acceptor ──► registry.select(pin) ──► tunnel::connect
//!                                                           │
//!               ◄──────────── splice ◄──────────────────────┘
//! ```
//!
//! The device is chosen when the connection arrives, never cached: a device
//! may detach between one connection and the next.
//!
//! # Stopping
//!
//! [`Relay::stop`] closes the listener and the acceptor and emits `Close`.
//! Tunnels that are already spliced keep running until their local
//! connection ends, which closes the tunnel too.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use usbmux_core::{pin_matches, ConnectivityError, RegistryWriter, SharedRegistry, Udid};

use crate::domain::{
    ListenerEvent, ListenerState, MuxError, RelayEvent, RelayOptions, EVENT_CHANNEL_CAPACITY,
};
use crate::infrastructure::listener::Listener;
use crate::infrastructure::notify::emit;
use crate::infrastructure::transport::{DaemonStream, SharedConnector};
use crate::infrastructure::tunnel;

// ── Public API ────────────────────────────────────────────────────────────────

/// A running relay.
///
/// Dropping it stops accepting and closes the listener without emitting
/// `Close`; call [`Relay::stop`] for an orderly shutdown.
#[derive(Debug)]
pub struct Relay {
    local_addr: SocketAddr,
    device_port: u16,
    options: RelayOptions,
    listener: Listener,
    shutdown: watch::Sender<bool>,
    events: mpsc::Sender<RelayEvent>,
    supervisor: JoinHandle<()>,
    acceptor: JoinHandle<()>,
}

impl Relay {
    /// Binds `127.0.0.1:relay_port` and starts forwarding to `device_port`.
    ///
    /// Returns as soon as the local port is bound.  The daemon is contacted
    /// in the background; readiness is reported by [`RelayEvent::Ready`] and
    /// a missing device by [`RelayEvent::Warning`] after
    /// `options.discovery_timeout`.  Pass `relay_port = 0` to let the OS pick
    /// a port and read it back from [`Relay::local_addr`].
    ///
    /// # Errors
    ///
    /// [`MuxError::Transport`] if the local port cannot be bound.
    pub async fn start(
        connector: SharedConnector,
        writer: RegistryWriter,
        device_port: u16,
        relay_port: u16,
        options: RelayOptions,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), MuxError> {
        let acceptor = TcpListener::bind((Ipv4Addr::LOCALHOST, relay_port)).await?;
        let local_addr = acceptor.local_addr()?;

        let registry = writer.shared();
        let (listener, listener_events) = Listener::open(Arc::clone(&connector), writer);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = tokio::spawn(supervise(
            listener_events,
            registry.clone(),
            options.clone(),
            events_tx.clone(),
        ));
        let acceptor = tokio::spawn(accept_loop(
            acceptor,
            Session {
                connector,
                registry,
                device_port,
                pin: options.udid.clone(),
                events: events_tx.clone(),
            },
            shutdown_rx,
        ));

        info!(
            local = %local_addr,
            device_port,
            udid = options.pin().unwrap_or("<any>"),
            "relay listening"
        );

        let relay = Self {
            local_addr,
            device_port,
            options,
            listener,
            shutdown: shutdown_tx,
            events: events_tx,
            supervisor,
            acceptor,
        };
        Ok((relay, events_rx))
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn device_port(&self) -> u16 {
        self.device_port
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// State of the underlying listener.
    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Closes the listener and the acceptor, then emits [`RelayEvent::Close`].
    ///
    /// In-flight tunnels are left running.
    pub async fn stop(mut self) {
        self.listener.close();
        self.supervisor.abort();
        let _ = self.shutdown.send(true);
        // The local port is released once the acceptor task has returned.
        let _ = (&mut self.acceptor).await;
        info!(local = %self.local_addr, "relay stopped");
        emit(&self.events, RelayEvent::Close);
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.acceptor.abort();
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Forwards listener events, runs the discovery watchdog and emits `Ready`.
async fn supervise(
    mut listener_events: mpsc::Receiver<ListenerEvent>,
    registry: SharedRegistry,
    options: RelayOptions,
    events: mpsc::Sender<RelayEvent>,
) {
    let pin = options.pin();
    let watchdog = tokio::time::sleep(options.discovery_timeout);
    tokio::pin!(watchdog);
    let mut watchdog_armed = true;
    let mut ready = false;

    loop {
        tokio::select! {
            () = &mut watchdog, if watchdog_armed => {
                watchdog_armed = false;
                warn_if_no_device(&registry, pin, &events);
            }
            event = listener_events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ListenerEvent::Attached(udid) => {
                        if !ready && pin_matches(pin, &udid) {
                            ready = true;
                            watchdog_armed = false;
                            info!(udid = %udid, "relay ready");
                            emit(&events, RelayEvent::Ready(udid.clone()));
                        }
                        emit(&events, RelayEvent::Attached(udid));
                    }
                    ListenerEvent::Detached(udid) => {
                        emit(&events, RelayEvent::Detached(udid));
                    }
                    ListenerEvent::Error(e) => {
                        error!(error = %e, "relay listener failed");
                        emit(&events, RelayEvent::Error(e));
                    }
                    ListenerEvent::Closed => {
                        warn!("usbmuxd closed the relay's listener; device list is frozen");
                    }
                }
            }
        }
    }

    // The listener is gone; the watchdog still owes its verdict.
    if watchdog_armed {
        watchdog.await;
        warn_if_no_device(&registry, pin, &events);
    }
    debug!("relay supervisor finished");
}

/// The watchdog's verdict: warn unless a device satisfying `pin` is present.
fn warn_if_no_device(
    registry: &SharedRegistry,
    pin: Option<&str>,
    events: &mpsc::Sender<RelayEvent>,
) {
    if registry.read(|r| r.satisfies(pin)) {
        return;
    }
    let err = ConnectivityError::for_pin(pin);
    warn!(error = %err, "discovery timeout elapsed without a device");
    emit(events, RelayEvent::Warning(err.into()));
}

// ── Acceptor ──────────────────────────────────────────────────────────────────

/// Everything a per-connection task needs.
#[derive(Clone)]
struct Session {
    connector: SharedConnector,
    registry: SharedRegistry,
    device_port: u16,
    pin: Option<Udid>,
    events: mpsc::Sender<RelayEvent>,
}

async fn accept_loop(acceptor: TcpListener, session: Session, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("relay acceptor shutting down");
                break;
            }
            accepted = acceptor.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "accepted local connection");
                    tokio::spawn(session.clone().handle(socket, peer));
                }
                Err(e) => {
                    // Transient (e.g. out of file descriptors); keep accepting.
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

impl Session {
    /// Serves one local connection from device selection to splice end.
    async fn handle(self, socket: TcpStream, peer: SocketAddr) {
        let device = match self.registry.select(self.pin.as_deref()) {
            Ok(device) => device,
            Err(e) => {
                warn!(%peer, error = %e, "no device for local connection");
                emit(&self.events, RelayEvent::Error(e.into()));
                return;
            }
        };

        let tunnel =
            match tunnel::connect(self.connector.as_ref(), device.device_id, self.device_port).await {
                Ok(tunnel) => tunnel,
                Err(e) => {
                    warn!(%peer, udid = %device.serial_number, error = %e, "tunnel failed");
                    emit(&self.events, RelayEvent::Error(e));
                    return;
                }
            };

        info!(%peer, udid = %device.serial_number, port = self.device_port, "splicing");
        emit(&self.events, RelayEvent::Connect);

        match splice(socket, tunnel).await {
            Ok(to_device) => {
                debug!(%peer, to_device, "local connection closed");
                emit(&self.events, RelayEvent::Disconnect);
            }
            Err(e) => {
                debug!(%peer, error = %e, "splice ended with I/O error");
            }
        }
    }
}

/// Copies bytes both ways until the local side ends.
///
/// Returns the number of bytes sent to the device once the local connection
/// reaches EOF.  The device closing first only ends the device-to-local
/// direction.  Both connections are closed on return, whatever the outcome.
async fn splice(socket: TcpStream, tunnel: DaemonStream) -> io::Result<u64> {
    let (mut local_read, mut local_write) = socket.into_split();
    let (mut device_read, mut device_write) = tokio::io::split(tunnel);

    let upstream = tokio::io::copy(&mut local_read, &mut device_write);
    let downstream = async {
        tokio::io::copy(&mut device_read, &mut local_write).await?;
        local_write.shutdown().await
    };
    tokio::pin!(upstream, downstream);

    let mut downstream_done = false;
    loop {
        tokio::select! {
            sent = &mut upstream => return sent,
            ended = &mut downstream, if !downstream_done => {
                downstream_done = true;
                ended?;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
