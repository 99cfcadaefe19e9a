//! Deduplicated store of discovered devices.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use blectl_core::{Device, DeviceAddress};
use tracing::debug;

#[derive(Debug, Default)]
struct DeviceTable {
    by_address: HashMap<DeviceAddress, Device>,
    /// Addresses in discovery order, for a stable replay
    order: Vec<DeviceAddress>,
}

/// Append-only device list.
///
/// The first discovery of an address wins: later advertisements with a
/// different name never overwrite the stored device.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    table: Mutex<DeviceTable>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn exists(&self, address: &DeviceAddress) -> bool {
        self.lock().by_address.contains_key(address)
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<Device> {
        self.lock().by_address.get(address).cloned()
    }

    /// Inserts `device` unless its address is already known.
    ///
    /// Returns `true` if the device was new.
    pub fn add(&self, device: Device) -> bool {
        let mut table = self.lock();
        if table.by_address.contains_key(&device.address) {
            return false;
        }

        debug!(address = %device.address, name = %device.name, "Device added");
        table.order.push(device.address.clone());
        table.by_address.insert(device.address.clone(), device);
        true
    }

    /// Visits every device in discovery order.
    ///
    /// The registry stays locked for the whole traversal: `callback` must
    /// not call back into the registry and should not block, or concurrent
    /// discoveries stall behind it.
    pub fn for_each(&self, mut callback: impl FnMut(&Device)) {
        let table = self.lock();
        for address in &table.order {
            if let Some(device) = table.by_address.get(address) {
                callback(device);
            }
        }
    }

    /// Copies out every device in discovery order.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices = Vec::with_capacity(self.len());
        self.for_each(|device| devices.push(device.clone()));
        devices
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
