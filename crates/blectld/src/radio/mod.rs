//! The BLE radio as seen by the daemon.
//!
//! The transport itself lives outside this crate. Anything that can enable
//! the adapter, scan, stop scanning, connect and disconnect can drive the
//! daemon by implementing [`Radio`]. Every call is blocking; the adapter
//! runs them on tokio's blocking pool.

use std::time::Duration;

use blectl_core::{DeviceAddress, Discovery};
use thiserror::Error;

mod simulated;

pub use simulated::{RadioOp, SimulatedHandle, SimulatedRadio};

/// Errors reported by a radio driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio is not enabled")]
    NotEnabled,

    #[error("a scan is already in progress")]
    AlreadyScanning,

    #[error("device {0} is unreachable")]
    Unreachable(DeviceAddress),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Driver(String),
}

impl RadioError {
    /// Creates a driver error from any displayable error.
    pub fn driver<E: std::fmt::Display>(err: E) -> Self {
        Self::Driver(err.to_string())
    }
}

/// Blocking capability surface of one BLE adapter.
pub trait Radio: Send + Sync + 'static {
    /// Owned connection to one peripheral.
    type Handle: Send + 'static;

    /// Powers up the adapter. Called once at startup.
    fn enable(&self) -> Result<(), RadioError>;

    /// Scans until [`Radio::stop_scan`] is called, reporting each
    /// advertisement to `on_discovery` on the calling thread.
    ///
    /// Returns `Ok(())` once stopped.
    fn scan(&self, on_discovery: &mut dyn FnMut(Discovery)) -> Result<(), RadioError>;

    /// Stops any running scan. Stopping when idle is not an error.
    fn stop_scan(&self) -> Result<(), RadioError>;

    /// Connects to `address`, giving up after `timeout`.
    fn connect(&self, address: &DeviceAddress, timeout: Duration)
        -> Result<Self::Handle, RadioError>;

    fn disconnect(&self, handle: &Self::Handle) -> Result<(), RadioError>;
}
