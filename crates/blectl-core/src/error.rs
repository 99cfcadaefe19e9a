//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Device address failed validation
    #[error("Invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Unknown command name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Command requires a target address but none was given
    #[error("Command {0} requires a target address")]
    MissingTarget(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
