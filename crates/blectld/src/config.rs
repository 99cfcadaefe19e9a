//! Daemon configuration.
//!
//! Values are layered, lowest precedence first:
//! 1. [`DaemonConfig::default`]
//! 2. An optional TOML file ([`DaemonConfig::load`])
//! 3. Environment and command-line overrides, applied by the binary
//!
//! ```toml
//! listen = "127.0.0.1:6969"
//! scan_secs = 8
//! ui_dir = "/usr/share/blectl/ui"
//!
//! [[simulated_devices]]
//! address = "AA:BB:CC:DD:EE:FF"
//! name = "Heart Rate Strap"
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use blectl_core::{DeviceAddress, Discovery};
use serde::Deserialize;
use thiserror::Error;

use crate::adapter::AdapterSettings;

/// Default HTTP listen address
pub const DEFAULT_LISTEN: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 6969));

/// Environment variable overriding the listen address
pub const LISTEN_ENV: &str = "BLECTL_LISTEN";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One peripheral advertised by the simulated radio.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulatedDevice {
    pub address: DeviceAddress,
    pub name: String,
}

impl SimulatedDevice {
    /// Parses the `ADDR=NAME` form used on the command line.
    pub fn parse(arg: &str) -> Result<Self, ConfigError> {
        let (address, name) = arg
            .split_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("expected ADDR=NAME, got '{arg}'")))?;
        let address =
            DeviceAddress::parse(address.trim()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self {
            address,
            name: name.trim().to_string(),
        })
    }

    pub fn to_discovery(&self) -> Discovery {
        Discovery::new(self.address.clone(), Some(self.name.clone()))
    }
}

/// Runtime settings of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on one frame write to one subscriber
    pub write_timeout: Duration,
    /// Upper bound on handling one command request; `/events` is exempt
    pub request_timeout: Duration,
    pub command_capacity: usize,
    pub log_capacity: usize,
    /// Frames buffered per subscriber before writes start to wait
    pub subscriber_buffer: usize,
    pub max_subscribers: Option<usize>,
    /// Static UI served for paths without a route
    pub ui_dir: Option<PathBuf>,
    pub simulated_devices: Vec<SimulatedDevice>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            scan_duration: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            command_capacity: 10,
            log_capacity: 10,
            subscriber_buffer: 32,
            max_subscribers: None,
            ui_dir: None,
            simulated_devices: Vec::new(),
        }
    }
}

/// On-disk form. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    listen: Option<SocketAddr>,
    scan_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    command_capacity: Option<usize>,
    log_capacity: Option<usize>,
    subscriber_buffer: Option<usize>,
    max_subscribers: Option<usize>,
    ui_dir: Option<PathBuf>,
    #[serde(default)]
    simulated_devices: Vec<SimulatedDevice>,
}

impl DaemonConfig {
    /// Reads `path` and layers it over the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(text)?;
        let mut config = Self::default();
        config.apply_file(file);
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(listen) = file.listen {
            self.listen = listen;
        }
        if let Some(secs) = file.scan_secs {
            self.scan_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.write_timeout_secs {
            self.write_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = file.command_capacity {
            self.command_capacity = n;
        }
        if let Some(n) = file.log_capacity {
            self.log_capacity = n;
        }
        if let Some(n) = file.subscriber_buffer {
            self.subscriber_buffer = n;
        }
        if file.max_subscribers.is_some() {
            self.max_subscribers = file.max_subscribers;
        }
        if file.ui_dir.is_some() {
            self.ui_dir = file.ui_dir;
        }
        self.simulated_devices.extend(file.simulated_devices);
    }

    /// Applies the `BLECTL_LISTEN` override if it is set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        match std::env::var(LISTEN_ENV) {
            Ok(value) => self.apply_listen(&value),
            Err(_) => Ok(()),
        }
    }

    fn apply_listen(&mut self, value: &str) -> Result<(), ConfigError> {
        self.listen = value
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{LISTEN_ENV}='{value}': {e}")))?;
        Ok(())
    }

    /// Rejects zero capacities and durations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("scan duration", self.scan_duration),
            ("connect timeout", self.connect_timeout),
            ("write timeout", self.write_timeout),
            ("request timeout", self.request_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }

        let sizes = [
            ("command_capacity", self.command_capacity),
            ("log_capacity", self.log_capacity),
            ("subscriber_buffer", self.subscriber_buffer),
            ("max_subscribers", self.max_subscribers.unwrap_or(1)),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, n)| *n == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            scan_duration: self.scan_duration,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Advertisements for the simulated radio, in configuration order.
    pub fn simulated_discoveries(&self) -> Vec<Discovery> {
        self.simulated_devices
            .iter()
            .map(SimulatedDevice::to_discovery)
            .collect()
    }
}
