//! Connection and scan state of the single radio.
//!
//! [`Adapter`] turns operator commands into radio calls and reports every
//! outcome on the log stream. State transitions:
//!
//! ```text
//! Idle ──scan──▶ Scanning ──deadline / STOP_SCAN──▶ Idle
//! Idle ──connect──▶ Connected          (failure: stays Idle)
//! Connected ──disconnect──▶ Idle       (failure: stays Connected)
//! ```
//!
//! One async mutex guards the connection state. CONNECT and DISCONNECT
//! hold it across the radio call, so the "already connected" check and the
//! state update are one critical section and concurrent connects are
//! serialized. The scan flag is a separate atomic: SCAN and STOP_SCAN never
//! take the mutex, so a scan starts at once even while a connect is
//! waiting on the radio.
//!
//! A DISCONNECT the radio rejects leaves `connected` set and the handle in
//! place, so the operator can retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use blectl_core::{Command, Device, DeviceAddress, Discovery, LogEntry};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::log_stream::LogStream;
use crate::radio::{Radio, RadioError};
use crate::registry::DeviceRegistry;

/// How long to wait for the radio's scan call to return once stopped.
const SCAN_STOP_GRACE: Duration = Duration::from_secs(2);

/// Failed adapter operations.
///
/// The `Display` text is what operators see as the ERROR log entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("You're already connected.")]
    AlreadyConnected,

    #[error("Currently not connected to any device.")]
    NotConnected,

    #[error("Already scanning.")]
    AlreadyScanning,

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    #[error("Could not scan - {0}")]
    Scan(#[source] RadioError),

    #[error("Could not stop scanning - {0}")]
    StopScan(#[source] RadioError),

    #[error("Could not connect to {name} - {source}")]
    Connect {
        name: String,
        #[source]
        source: RadioError,
    },

    #[error("Could not disconnect device - {0}")]
    Disconnect(#[source] RadioError),
}

/// Timing knobs for radio operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSettings {
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct AdapterState<H> {
    connected: bool,
    handle: Option<H>,
    device: Option<Device>,
}

impl<H> Default for AdapterState<H> {
    fn default() -> Self {
        Self {
            connected: false,
            handle: None,
            device: None,
        }
    }
}

/// Point-in-time view of the adapter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatus {
    pub connected: bool,
    pub has_handle: bool,
    pub scanning: bool,
    pub device: Option<DeviceAddress>,
}

pub struct Adapter<R: Radio> {
    radio: Arc<R>,
    state: Mutex<AdapterState<R::Handle>>,
    scanning: AtomicBool,
    devices: Arc<DeviceRegistry>,
    logs: LogStream,
    settings: AdapterSettings,
}

impl<R: Radio> Adapter<R> {
    pub fn new(
        radio: Arc<R>,
        devices: Arc<DeviceRegistry>,
        logs: LogStream,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            radio,
            state: Mutex::new(AdapterState::default()),
            scanning: AtomicBool::new(false),
            devices,
            logs,
            settings,
        }
    }

    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }

    pub async fn status(&self) -> AdapterStatus {
        let state = self.state.lock().await;
        AdapterStatus {
            connected: state.connected,
            has_handle: state.handle.is_some(),
            scanning: self.scanning.load(Ordering::Acquire),
            device: state.device.as_ref().map(|d| d.address.clone()),
        }
    }

    /// Runs one command to completion and reports a failure as an ERROR
    /// log entry.
    pub async fn execute(&self, command: Command) {
        let kind = command.kind();
        let result = match command {
            Command::Scan => self.scan(self.settings.scan_duration).await,
            Command::StopScan => self.stop_scan().await,
            Command::Connect(target) => self.connect(target).await,
            Command::Disconnect => self.disconnect().await,
        };

        if let Err(e) = result {
            warn!(command = %kind, error = %e, "Command failed");
            self.logs.error(e.to_string()).await;
        }
    }

    /// Scans for `duration`, then stops the radio.
    ///
    /// Named discoveries are added to the device registry and announced as
    /// DEVICE entries the first time their address is seen.
    pub async fn scan(&self, duration: Duration) -> Result<(), AdapterError> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AdapterError::AlreadyScanning);
        }

        info!(duration = ?duration, "Scan started");
        self.logs.info("Scanning...").await;

        let result = self.run_scan(duration).await;
        self.scanning.store(false, Ordering::Release);
        result
    }

    async fn run_scan(&self, duration: Duration) -> Result<(), AdapterError> {
        let mut scan = self.spawn_radio_scan();

        tokio::select! {
            joined = &mut scan => {
                // Ended before the deadline: STOP_SCAN or a driver failure.
                match joined {
                    Ok(Ok(())) => {
                        debug!("Scan ended before its deadline");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(AdapterError::Scan(e)),
                    Err(e) => Err(AdapterError::Scan(RadioError::driver(e))),
                }
            }
            () = tokio::time::sleep(duration) => {
                self.radio_call(|radio| radio.stop_scan())
                    .await
                    .map_err(AdapterError::StopScan)?;

                match tokio::time::timeout(SCAN_STOP_GRACE, scan).await {
                    Ok(Ok(Err(e))) => warn!(error = %e, "Radio scan returned an error after stop"),
                    Ok(Err(e)) => warn!(error = %e, "Radio scan task failed"),
                    Err(_) => warn!("Radio scan did not return after stop"),
                    Ok(Ok(Ok(()))) => {}
                }

                info!("Scan stopped at deadline");
                self.logs.info("Stopped Scanning.").await;
                Ok(())
            }
        }
    }

    fn spawn_radio_scan(&self) -> JoinHandle<Result<(), RadioError>> {
        let radio = Arc::clone(&self.radio);
        let devices = Arc::clone(&self.devices);
        let logs = self.logs.clone();

        tokio::task::spawn_blocking(move || {
            radio.scan(&mut |discovery: Discovery| record_discovery(&devices, &logs, discovery))
        })
    }

    /// Stops scanning whether or not a scan is running.
    pub async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.radio_call(|radio| radio.stop_scan())
            .await
            .map_err(AdapterError::StopScan)?;

        info!("Scan stopped on request");
        self.logs.info("Stopped Scanning.").await;
        Ok(())
    }

    /// Stops a running scan without reporting it to operators.
    ///
    /// Used at shutdown so no blocking radio scan outlives the runtime.
    pub async fn halt(&self) {
        if !self.scanning.load(Ordering::Acquire) {
            return;
        }
        match self.radio_call(|radio| radio.stop_scan()).await {
            Ok(()) => debug!("Scan halted for shutdown"),
            Err(e) => warn!(error = %e, "Failed to halt scan"),
        }
    }

    /// Connects to a previously discovered device.
    pub async fn connect(&self, address: DeviceAddress) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        if state.connected || state.handle.is_some() {
            return Err(AdapterError::AlreadyConnected);
        }

        let device = self
            .devices
            .get(&address)
            .ok_or_else(|| AdapterError::DeviceNotFound(address.clone()))?;

        let timeout = self.settings.connect_timeout;
        let target = address.clone();
        let handle = self
            .radio_call(move |radio| radio.connect(&target, timeout))
            .await
            .map_err(|source| AdapterError::Connect {
                name: device.name.clone(),
                source,
            })?;

        state.connected = true;
        state.handle = Some(handle);
        state.device = Some(device.clone());
        drop(state);

        info!(address = %address, name = %device.name, "Connected");
        self.logs.info(format!("Connected to {}", device.name)).await;
        Ok(())
    }

    /// Disconnects the current device.
    pub async fn disconnect(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(AdapterError::NotConnected);
        }
        let Some(handle) = state.handle.take() else {
            return Err(AdapterError::NotConnected);
        };

        let radio = Arc::clone(&self.radio);
        let joined = tokio::task::spawn_blocking(move || {
            let result = radio.disconnect(&handle);
            (handle, result)
        })
        .await;

        match joined {
            Ok((_, Ok(()))) => {
                let device = state.device.take();
                *state = AdapterState::default();
                drop(state);

                info!(address = ?device.map(|d| d.address), "Disconnected");
                self.logs.info("Disconnected.").await;
                Ok(())
            }
            Ok((handle, Err(e))) => {
                // Keep the handle so the operator can retry.
                state.handle = Some(handle);
                Err(AdapterError::Disconnect(e))
            }
            Err(e) => {
                // The handle went down with the task; nothing left to retry with.
                *state = AdapterState::default();
                Err(AdapterError::Disconnect(RadioError::driver(e)))
            }
        }
    }

    /// Runs a blocking radio call on the blocking pool.
    async fn radio_call<T, F>(&self, call: F) -> Result<T, RadioError>
    where
        T: Send + 'static,
        F: FnOnce(&R) -> Result<T, RadioError> + Send + 'static,
    {
        let radio = Arc::clone(&self.radio);
        tokio::task::spawn_blocking(move || call(&radio))
            .await
            .map_err(RadioError::driver)?
    }
}

/// Discovery callback. Runs on the radio's blocking thread.
fn record_discovery(devices: &DeviceRegistry, logs: &LogStream, discovery: Discovery) {
    if devices.exists(&discovery.address) {
        return;
    }
    let Some(device) = discovery.into_device() else {
        return;
    };
    if devices.add(device.clone()) {
        logs.blocking_push(LogEntry::device(&device));
    }
}
