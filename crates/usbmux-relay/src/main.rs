//! usbmux-relay: entry point.
//!
//! Exposes a TCP port on a USB-attached device as a port on `127.0.0.1`, or
//! waits for a device and prints its session handle.
//!
//! # Usage
//!
//! ```text
//! usbmux-relay [--config <FILE>] [--daemon <ADDR>] <COMMAND>
//!
//! Commands:
//!   relay  --device-port <PORT> [--local-port <PORT>] [--udid <UDID>] [--timeout-ms <MS>]
//!   find   [--udid <UDID>] [--timeout-ms <MS>]
//! ```
//!
//! # Precedence
//!
//! Command-line flags (and their environment variables) override the TOML
//! file, which overrides the built-in defaults.
//!
//! | Variable                 | Flag       | Description                    |
//! |--------------------------|------------|--------------------------------|
//! | `USBMUX_RELAY_CONFIG`    | `--config` | Path to the TOML config file   |
//! | `USBMUXD_SOCKET_ADDRESS` | `--daemon` | `UNIX:<path>` or `<ip>:<port>` |
//! | `RUST_LOG`               |            | `tracing` filter               |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use usbmux_relay::domain::{FindOptions, RelayEvent, RelayOptions, SOCKET_ADDRESS_ENV};
use usbmux_relay::infrastructure::{load_config, RelayConfigFile};
use usbmux_relay::{DaemonAddress, MuxClient};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Client and port relay for usbmuxd.
#[derive(Debug, Parser)]
#[command(name = "usbmux-relay", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "USBMUX_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// usbmuxd address: `UNIX:<path>` or `<ip>:<port>`.
    #[arg(long, global = true, env = SOCKET_ADDRESS_ENV)]
    daemon: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Forward a local TCP port to a port on a device.
    Relay(RelayArgs),
    /// Wait for a device and print its session handle.
    Find(FindArgs),
}

#[derive(Debug, Args)]
struct RelayArgs {
    /// Service port on the device.
    #[arg(long)]
    device_port: Option<u16>,

    /// Local port to accept on.  Defaults to the device port.
    #[arg(long)]
    local_port: Option<u16>,

    /// Only forward to the device with this UDID.
    #[arg(long)]
    udid: Option<String>,

    /// Warn if no qualifying device appears within this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct FindArgs {
    /// Only accept the device with this UDID.
    #[arg(long)]
    udid: Option<String>,

    /// Give up after this many milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

/// Relay settings after merging flags over the config file.
#[derive(Debug, PartialEq)]
struct RelaySettings {
    device_port: u16,
    local_port: u16,
    options: RelayOptions,
}

fn daemon_address(flag: Option<&str>, file: &RelayConfigFile) -> anyhow::Result<DaemonAddress> {
    if let Some(text) = flag {
        return text
            .parse()
            .with_context(|| format!("invalid --daemon address '{text}'"));
    }
    Ok(file
        .daemon_address()
        .context("invalid [daemon] address in config file")?
        .unwrap_or_default())
}

impl RelayArgs {
    fn settings(&self, file: &RelayConfigFile) -> anyhow::Result<RelaySettings> {
        let device_port = self
            .device_port
            .or(file.relay.device_port)
            .context("no device port: pass --device-port or set [relay] device_port")?;
        let local_port = self
            .local_port
            .or(file.relay.local_port)
            .unwrap_or(device_port);

        let mut options = file.relay_options();
        if let Some(udid) = &self.udid {
            options.udid = Some(udid.clone());
        }
        if let Some(ms) = self.timeout_ms {
            options.discovery_timeout = Duration::from_millis(ms);
        }

        Ok(RelaySettings {
            device_port,
            local_port,
            options,
        })
    }
}

impl FindArgs {
    fn options(&self, file: &RelayConfigFile) -> FindOptions {
        FindOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            udid: self.udid.clone().or_else(|| file.relay.udid.clone()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn log_relay_event(event: &RelayEvent) {
    match event {
        RelayEvent::Ready(udid) => info!(%udid, "relay ready"),
        RelayEvent::Warning(e) => warn!("{e}"),
        RelayEvent::Attached(udid) => info!(%udid, "device attached"),
        RelayEvent::Detached(udid) => info!(%udid, "device detached"),
        RelayEvent::Error(e) => error!("{e}"),
        RelayEvent::Connect => debug!("connection forwarded"),
        RelayEvent::Disconnect => debug!("connection closed"),
        RelayEvent::Close => info!("relay closed"),
    }
}

async fn run_relay(client: MuxClient, settings: RelaySettings) -> anyhow::Result<()> {
    let (relay, mut events) = client
        .relay(settings.device_port, settings.local_port, settings.options)
        .await
        .with_context(|| format!("failed to bind 127.0.0.1:{}", settings.local_port))?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_relay_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("received Ctrl+C, stopping relay");
                break;
            }
        }
    }

    relay.stop().await;
    while let Ok(event) = events.try_recv() {
        log_relay_event(&event);
    }
    Ok(())
}

async fn run_find(client: MuxClient, options: FindOptions) -> anyhow::Result<()> {
    let device_id = client
        .find_device(&options)
        .await
        .context("no device found")?;
    println!("{device_id}");
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RelayConfigFile::default(),
    };

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file.logging.level)),
        )
        .init();

    let address = daemon_address(cli.daemon.as_deref(), &file)?;
    info!(daemon = %address, "usbmux-relay starting");
    let client = MuxClient::new(address);

    match &cli.command {
        Command::Relay(args) => run_relay(client, args.settings(&file)?).await,
        Command::Find(args) => run_find(client, args.options(&file)).await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
