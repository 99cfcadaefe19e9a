//! blectl Core - Shared types for the BLE control plane
//!
//! This crate provides the domain types shared between the daemon
//! (blectld) and anything that speaks its log stream:
//! - device identity and discovery records
//! - operator commands
//! - log entries and their Server-Sent Events wire encoding
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod command;
pub mod device;
pub mod error;
pub mod log;

// Re-exports for convenience
pub use command::{Command, CommandKind};
pub use device::{Device, DeviceAddress, Discovery};
pub use error::{DomainError, DomainResult};
pub use log::{LogEntry, LogLevel};
