//! Error types for the participant

use proven_wal::WalError;
use thiserror::Error;

/// Participant error types
#[derive(Error, Debug)]
pub enum ParticipantError {
    #[error("Log error: {0}")]
    Wal(#[from] WalError),

    #[error("Resource store error: {0}")]
    Store(#[from] std::io::Error),
}

/// Result type for participant operations
pub type Result<T> = std::result::Result<T, ParticipantError>;
