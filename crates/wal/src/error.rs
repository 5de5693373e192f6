//! Error types for the write-ahead log

use thiserror::Error;

/// Result type for log operations
pub type Result<T> = std::result::Result<T, WalError>;

/// Errors that can occur while writing or reading the log
#[derive(Debug, Error)]
pub enum WalError {
    #[error("Log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Log is unusable after a failed write could not be rolled back")]
    Poisoned,
}
