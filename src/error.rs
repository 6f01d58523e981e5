//! Error types for Tracewire

use std::io;
use thiserror::Error;

/// Result type for Tracewire operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors that can occur in Tracewire
#[derive(Debug, Error)]
pub enum TraceError {
    /// Lifecycle operation not valid in the current state
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the coordinator was in
        state: String,
    },

    /// An absent entry was submitted
    #[error("Entry must not be null")]
    NullEntry,

    /// Malformed input to a public operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport connect or reconnect exhausted
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Stored session or transport message could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outgoing HTTP call failed
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}
