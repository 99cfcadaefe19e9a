//! blectl Daemon - BLE command intake and live log stream
//!
//! Runs the HTTP control plane for one BLE radio. Browsers queue commands
//! with plain GET/POST requests and follow the outcome on `/events`.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default address (0.0.0.0:6969)
//! blectld
//!
//! # Custom address, longer scans, serve the UI
//! blectld --listen 127.0.0.1:8080 --scan-secs 10 --ui-dir ./ui
//!
//! # Layer a config file under the flags
//! blectld --config /etc/blectl.toml
//!
//! # Advertise extra simulated peripherals
//! blectld --simulate AA:BB:CC:DD:EE:FF="Heart Rate Strap"
//!
//! # Enable debug logging
//! RUST_LOG=blectld=debug blectld
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blectld::config::SimulatedDevice;
use blectld::radio::SimulatedRadio;
use blectld::server::DaemonServer;
use blectld::{AppContext, DaemonConfig};

/// blectl daemon - BLE control plane
#[derive(Parser, Debug)]
#[command(name = "blectld", version, about)]
struct Args {
    /// TOML config file, applied over the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides BLECTL_LISTEN)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// How long a scan runs before it is stopped
    #[arg(long, value_name = "SECS")]
    scan_secs: Option<u64>,

    /// Give up on a connect after this long
    #[arg(long, value_name = "SECS")]
    connect_timeout_secs: Option<u64>,

    /// Directory with the browser UI
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Simulated peripheral as ADDR=NAME (repeatable)
    #[arg(long = "simulate", value_name = "ADDR=NAME")]
    simulated: Vec<String>,
}

impl Args {
    /// Layers defaults, config file, environment and flags.
    fn into_config(self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };
        config.apply_env()?;

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(secs) = self.scan_secs {
            config.scan_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if self.ui_dir.is_some() {
            config.ui_dir = self.ui_dir;
        }
        for arg in &self.simulated {
            config.simulated_devices.push(SimulatedDevice::parse(arg)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config().context("Invalid configuration")?;
    run_daemon(config)
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("blectld=info".parse()?)
                .add_directive("blectl_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "blectl daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let radio = SimulatedRadio::new(config.simulated_discoveries());
    info!(
        devices = config.simulated_devices.len(),
        "Using simulated radio"
    );

    let (ctx, workers) = AppContext::start(config, radio, cancel_token.clone())
        .await
        .context("Failed to start daemon")?;

    let server = DaemonServer::new(ctx, cancel_token.clone());
    let result = server.run().await;

    // The server may also stop on its own, e.g. a bind failure.
    cancel_token.cancel();
    workers.join().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("blectl daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "blectld",
            "--listen",
            "127.0.0.1:7001",
            "--scan-secs",
            "9",
            "--simulate",
            "AA:01=Band",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.listen.port(), 7001);
        assert_eq!(config.scan_duration, Duration::from_secs(9));
        assert_eq!(config.simulated_devices.len(), 1);
    }

    #[test]
    fn test_zero_scan_rejected() {
        let args = Args::parse_from(["blectld", "--scan-secs", "0"]);
        assert!(args.into_config().is_err());
    }
}
