//! In-process radio for running the daemon without hardware.
//!
//! Advertises a fixed list of peripherals, one per discovery interval, and
//! accepts connections to any of them. Failures can be injected per
//! operation, and call counts and open connections are observable, which
//! is what the daemon's tests rely on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use blectl_core::{DeviceAddress, Discovery};
use tracing::debug;

use super::{Radio, RadioError};

/// Default pause between two simulated advertisements
const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_millis(250);

/// Default time a simulated connect takes
const DEFAULT_CONNECT_LATENCY: Duration = Duration::from_millis(50);

/// Radio operation, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioOp {
    Enable,
    Scan,
    StopScan,
    Connect,
    Disconnect,
}

/// Connection handle issued by [`SimulatedRadio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedHandle {
    id: u64,
    address: DeviceAddress,
}

impl SimulatedHandle {
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }
}

#[derive(Debug, Default)]
struct ScanState {
    active: bool,
    stop_requested: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct SimulatedRadio {
    advertisements: Vec<Discovery>,
    discovery_interval: Duration,
    connect_latency: Duration,
    enabled: AtomicBool,
    scan: Mutex<ScanState>,
    scan_changed: Condvar,
    open: Mutex<HashSet<u64>>,
    next_handle: AtomicU64,
    failures: Mutex<Vec<(RadioOp, RadioError)>>,
    calls: Mutex<HashMap<RadioOp, usize>>,
}

impl SimulatedRadio {
    /// Creates a radio advertising `advertisements` in order.
    pub fn new(advertisements: Vec<Discovery>) -> Self {
        Self {
            advertisements,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            connect_latency: DEFAULT_CONNECT_LATENCY,
            enabled: AtomicBool::new(false),
            scan: Mutex::new(ScanState::default()),
            scan_changed: Condvar::new(),
            open: Mutex::new(HashSet::new()),
            next_handle: AtomicU64::new(1),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    #[must_use]
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Makes the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RadioOp, error: RadioError) {
        lock(&self.failures).push((op, error));
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: RadioOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        lock(&self.open).len()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scan).active
    }

    fn begin(&self, op: RadioOp) -> Result<(), RadioError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;

        if op != RadioOp::Enable && !self.enabled.load(Ordering::Acquire) {
            return Err(RadioError::NotEnabled);
        }

        let mut failures = lock(&self.failures);
        if let Some(pos) = failures.iter().position(|(failing, _)| *failing == op) {
            let (_, error) = failures.remove(pos);
            return Err(error);
        }
        Ok(())
    }

    fn advertises(&self, address: &DeviceAddress) -> bool {
        self.advertisements.iter().any(|d| &d.address == address)
    }
}

impl Radio for SimulatedRadio {
    type Handle = SimulatedHandle;

    fn enable(&self) -> Result<(), RadioError> {
        self.begin(RadioOp::Enable)?;
        self.enabled.store(true, Ordering::Release);
        debug!("Simulated radio enabled");
        Ok(())
    }

    fn scan(&self, on_discovery: &mut dyn FnMut(Discovery)) -> Result<(), RadioError> {
        self.begin(RadioOp::Scan)?;
        {
            let mut state = lock(&self.scan);
            if state.active {
                return Err(RadioError::AlreadyScanning);
            }
            state.active = true;
            state.stop_requested = false;
        }
        debug!("Simulated scan started");

        let mut pending = self.advertisements.iter().cloned();
        loop {
            let state = lock(&self.scan);
            let (mut state, _) = self
                .scan_changed
                .wait_timeout_while(state, self.discovery_interval, |s| !s.stop_requested)
                .unwrap_or_else(PoisonError::into_inner);

            if state.stop_requested {
                *state = ScanState::default();
                debug!("Simulated scan stopped");
                return Ok(());
            }
            drop(state);

            if let Some(discovery) = pending.next() {
                on_discovery(discovery);
            }
        }
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        self.begin(RadioOp::StopScan)?;
        let mut state = lock(&self.scan);
        if state.active {
            state.stop_requested = true;
            self.scan_changed.notify_all();
        }
        Ok(())
    }

    fn connect(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<SimulatedHandle, RadioError> {
        self.begin(RadioOp::Connect)?;
        if !self.advertises(address) {
            return Err(RadioError::Unreachable(address.clone()));
        }
        if self.connect_latency > timeout {
            thread::sleep(timeout);
            return Err(RadioError::Timeout(timeout));
        }
        thread::sleep(self.connect_latency);

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock(&self.open).insert(id);
        debug!(address = %address, handle = id, "Simulated connection opened");
        Ok(SimulatedHandle {
            id,
            address: address.clone(),
        })
    }

    fn disconnect(&self, handle: &SimulatedHandle) -> Result<(), RadioError> {
        self.begin(RadioOp::Disconnect)?;
        if !lock(&self.open).remove(&handle.id) {
            return Err(RadioError::Driver(format!(
                "connection {} is not open",
                handle.id
            )));
        }
        debug!(address = %handle.address, handle = handle.id, "Simulated connection closed");
        Ok(())
    }
}
