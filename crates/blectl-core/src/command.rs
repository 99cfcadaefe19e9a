//! Operator commands accepted by the daemon.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{DeviceAddress, DomainError};

/// Kind of an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Scan,
    StopScan,
    Connect,
    Disconnect,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "SCAN",
            Self::StopScan => "STOP_SCAN",
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCAN" => Ok(Self::Scan),
            "STOP_SCAN" => Ok(Self::StopScan),
            "CONNECT" => Ok(Self::Connect),
            "DISCONNECT" => Ok(Self::Disconnect),
            other => Err(DomainError::UnknownCommand(other.to_string())),
        }
    }
}

/// A command queued by an HTTP handler and consumed once by the event loop.
///
/// Only `Connect` carries a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan,
    StopScan,
    Connect(DeviceAddress),
    Disconnect,
}

impl Command {
    pub fn scan() -> Self {
        Self::Scan
    }

    pub fn stop_scan() -> Self {
        Self::StopScan
    }

    pub fn connect(target: DeviceAddress) -> Self {
        Self::Connect(target)
    }

    pub fn disconnect() -> Self {
        Self::Disconnect
    }

    /// Builds a command from its parts, checking that a target is present
    /// exactly when the kind needs one.
    pub fn from_parts(
        kind: CommandKind,
        target: Option<DeviceAddress>,
    ) -> Result<Self, DomainError> {
        match (kind, target) {
            (CommandKind::Connect, Some(target)) => Ok(Self::Connect(target)),
            (CommandKind::Connect, None) => Err(DomainError::MissingTarget(kind.to_string())),
            (CommandKind::Scan, _) => Ok(Self::Scan),
            (CommandKind::StopScan, _) => Ok(Self::StopScan),
            (CommandKind::Disconnect, _) => Ok(Self::Disconnect),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Scan => CommandKind::Scan,
            Self::StopScan => CommandKind::StopScan,
            Self::Connect(_) => CommandKind::Connect,
            Self::Disconnect => CommandKind::Disconnect,
        }
    }

    pub fn target(&self) -> Option<&DeviceAddress> {
        match self {
            Self::Connect(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} {}", self.kind(), target),
            None => write!(f, "{}", self.kind()),
        }
    }
}
