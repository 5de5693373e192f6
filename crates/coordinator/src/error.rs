//! Error types for the coordinator

use proven_common::{SourceError, TransactionId};
use proven_protocol::ParseError;
use proven_wal::WalError;
use thiserror::Error;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Log error: {0}")]
    Wal(#[from] WalError),

    #[error("Artifact error: {0}")]
    Sink(#[from] std::io::Error),

    #[error(transparent)]
    InvalidSource(#[from] SourceError),

    #[error("Transaction already pending: {0}")]
    DuplicateTransaction(TransactionId),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ParseError),

    #[error("Inbox closed for transaction {0}")]
    InboxClosed(TransactionId),

    #[error("Transaction task failed: {0}")]
    TaskFailed(String),
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
