//! TOML configuration file.
//!
//! Every key is optional; command-line flags override whatever the file sets.
//!
//! ```toml
//! [daemon]
//! address = "UNIX:/var/run/usbmuxd"
//!
//! [relay]
//! device_port = 22
//! local_port = 2222
//! udid = "00008030-001A2B3C4D5E6F70"
//! discovery_timeout_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Missing sections and keys fall back to the `default_*` helpers below, and a
//! missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{AddressParseError, DaemonAddress, RelayOptions};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `[daemon] address` is not a valid daemon address.
    #[error(transparent)]
    Address(#[from] AddressParseError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfigFile {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Where usbmuxd listens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DaemonSection {
    /// `UNIX:<path>` or `<ip>:<port>`.  Absent means the platform default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    /// Service port on the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_port: Option<u16>,
    /// Local port to accept on.  Absent means the same as `device_port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    /// Only forward to this device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_discovery_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            device_port: None,
            local_port: None,
            udid: None,
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelayConfigFile {
    /// The configured daemon address, if any.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Address`] when `[daemon] address` does not parse.
    pub fn daemon_address(&self) -> Result<Option<DaemonAddress>, ConfigError> {
        self.daemon
            .address
            .as_deref()
            .map(|text| text.parse::<DaemonAddress>())
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Relay options built from the `[relay]` section.
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            discovery_timeout: Duration::from_millis(self.relay.discovery_timeout_ms),
            udid: self.relay.udid.clone(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the file at `path`, returning defaults if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses file contents.
///
/// # Errors
///
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(content: &str) -> Result<RelayConfigFile, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
