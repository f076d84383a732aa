//! Infrastructure layer for usbmux-relay.
//!
//! Everything that touches a socket or a task lives here.
//!
//! - `transport`   – the [`DaemonConnector`] seam and exact single-message reads
//! - `listener`    – the long-lived `Listen` connection feeding the registry
//! - `tunnel`      – one-shot `Connect` negotiation
//! - `relay`       – local TCP acceptor spliced onto device tunnels
//! - `config_file` – the optional TOML configuration file
//! - `notify`      – non-blocking event delivery

pub mod config_file;
pub mod listener;
mod notify;
pub mod relay;
pub mod transport;
pub mod tunnel;

pub use config_file::{load_config, ConfigError, RelayConfigFile};
pub use listener::Listener;
pub use relay::Relay;
pub use transport::{DaemonConnector, DaemonStream, SharedConnector};
