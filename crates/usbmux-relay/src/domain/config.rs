//! Runtime configuration types.
//!
//! [`DaemonAddress`] says where usbmuxd listens.  [`RelayOptions`] and
//! [`FindOptions`] tune the two operations that wait for a device.  All three
//! are plain values; reading them from a file or the command line happens in
//! the infrastructure layer and `main.rs`.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use usbmux_core::Udid;

/// Environment variable that overrides the platform default daemon address.
pub const SOCKET_ADDRESS_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

/// Daemon socket path on Unix-like systems.
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/usbmuxd";

/// Daemon TCP address on platforms without Unix sockets.
pub const DEFAULT_TCP_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 27015));

/// How long to wait for a device before warning or giving up.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Prefix that marks a Unix socket path in textual addresses.
const UNIX_PREFIX: &str = "UNIX:";

// ── Daemon address ────────────────────────────────────────────────────────────

/// Where the usbmuxd daemon accepts connections.
///
/// Textual form, as accepted by [`FromStr`] and the
/// `USBMUXD_SOCKET_ADDRESS` variable:
///
/// | Text                    | Address                          |
/// |-------------------------|----------------------------------|
/// | `UNIX:/var/run/usbmuxd` | `Unix("/var/run/usbmuxd")`       |
/// | `127.0.0.1:27015`       | `Tcp(127.0.0.1:27015)`           |
///
/// # Example
///
/// ```rust
/// use usbmux_relay::domain::DaemonAddress;
///
/// let addr: DaemonAddress = "UNIX:/tmp/usbmuxd".parse().unwrap();
/// assert_eq!(addr.to_string(), "UNIX:/tmp/usbmuxd");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

/// A daemon address string that is neither `UNIX:<path>` nor `ip:port`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid daemon address {input:?}: expected UNIX:<path> or <ip>:<port>")]
pub struct AddressParseError {
    pub input: String,
}

impl DaemonAddress {
    /// The default address, unless [`SOCKET_ADDRESS_ENV`] overrides it.
    ///
    /// An unset or blank variable yields [`DaemonAddress::default`].
    ///
    /// # Errors
    ///
    /// Returns [`AddressParseError`] when the variable is set to something
    /// unparseable.
    pub fn from_env() -> Result<Self, AddressParseError> {
        match std::env::var(SOCKET_ADDRESS_ENV) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }
}

impl Default for DaemonAddress {
    #[cfg(unix)]
    fn default() -> Self {
        DaemonAddress::Unix(PathBuf::from(DEFAULT_UNIX_SOCKET))
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        DaemonAddress::Tcp(DEFAULT_TCP_ADDRESS)
    }
}

impl FromStr for DaemonAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || AddressParseError {
            input: s.to_string(),
        };
        match s.strip_prefix(UNIX_PREFIX) {
            Some("") => Err(err()),
            Some(path) => Ok(DaemonAddress::Unix(PathBuf::from(path))),
            None => s.parse().map(DaemonAddress::Tcp).map_err(|_| err()),
        }
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonAddress::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
            DaemonAddress::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

// ── Operation options ─────────────────────────────────────────────────────────

/// Options for a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// After this long without a qualifying device the relay emits a warning.
    pub discovery_timeout: Duration,
    /// Only forward to this device.  `None` picks the earliest-attached one.
    pub udid: Option<Udid>,
}

impl RelayOptions {
    pub fn pin(&self) -> Option<&str> {
        self.udid.as_deref()
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            udid: None,
        }
    }
}

/// Options for finding a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOptions {
    /// Give up after this long.
    pub timeout: Duration,
    /// Only accept this device.
    pub udid: Option<Udid>,
}

impl FindOptions {
    pub fn pin(&self) -> Option<&str> {
        self.udid.as_deref()
    }
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            udid: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
