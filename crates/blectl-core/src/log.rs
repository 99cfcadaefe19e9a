//! Operator-facing log entries and their Server-Sent Events encoding.
//!
//! Every component of the daemon reports outcomes as [`LogEntry`] values.
//! The broadcast loop renders each entry once with [`LogEntry::to_frame`]
//! and writes the same bytes to every subscriber:
//!
//! ```text
//! event: DEVICE
//! data: "AA:BB:CC:DD:EE:FF;MyDevice"
//!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Device;

/// Severity/category of a log entry. Doubles as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Device,
    Error,
}

impl LogLevel {
    /// SSE event name for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Device => "DEVICE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of the log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// DEVICE entry announcing `device` as `<address>;<name>`.
    pub fn device(device: &Device) -> Self {
        Self::new(LogLevel::Device, device.payload())
    }

    /// Renders the entry as one SSE frame.
    ///
    /// Line breaks inside the message would terminate the `data:` field
    /// early, so they are folded into spaces.
    pub fn to_frame(&self) -> String {
        let message: String = self
            .message
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        format!("event: {}\ndata: \"{}\"\n\n", self.level, message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}
