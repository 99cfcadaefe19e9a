//! Device entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable, opaque identifier of a BLE peripheral.
///
/// Usually a MAC-style string (e.g., "AA:BB:CC:DD:EE:FF") but the daemon
/// never interprets it beyond equality. It appears verbatim in the
/// `<address>;<name>` DEVICE payload, so it may not contain `;` or
/// control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Parses and validates an address.
    pub fn parse(address: impl Into<String>) -> DomainResult<Self> {
        let address = address.into();
        let invalid = |reason: &str| DomainError::InvalidAddress {
            address: address.clone(),
            reason: reason.to_string(),
        };

        if address.trim().is_empty() {
            return Err(invalid("address is empty"));
        }
        if address.contains(';') {
            return Err(invalid("address may not contain ';'"));
        }
        if address.chars().any(char::is_control) {
            return Err(invalid("address may not contain control characters"));
        }

        Ok(Self(address))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Device
// ============================================================================

/// A peripheral seen during a scan.
///
/// Devices are append-only: once an address is known its name is never
/// rewritten by later advertisements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: DeviceAddress,
    pub name: String,
    pub first_seen: DateTime<Utc>,
}

impl Device {
    /// Creates a device first seen now.
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            first_seen: Utc::now(),
        }
    }

    /// Payload of the DEVICE log entry for this device: `<address>;<name>`.
    pub fn payload(&self) -> String {
        format!("{};{}", self.address, self.name)
    }
}

/// A single advertisement reported by the radio while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub address: DeviceAddress,
    /// Advertised local name, if the peripheral sent one
    pub local_name: Option<String>,
}

impl Discovery {
    pub fn new(address: DeviceAddress, local_name: Option<String>) -> Self {
        Self {
            address,
            local_name,
        }
    }

    /// Converts into a [`Device`] if the advertisement carried a usable name.
    ///
    /// Anonymous advertisements are not worth listing to an operator.
    pub fn into_device(self) -> Option<Device> {
        let name = self.local_name?;
        if name.trim().is_empty() {
            return None;
        }
        Some(Device::new(self.address, name))
    }
}
