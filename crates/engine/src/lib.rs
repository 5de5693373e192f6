//! Message transport for collage nodes
//!
//! This crate provides the point-to-point transport used by the coordinator
//! and participants: an in-memory mock network for tests and a TCP
//! transport for separate processes. Both follow the same contract: sends
//! are best-effort, and a handler that rejects a message gets it again later.

use thiserror::Error;

pub mod client;
pub mod engine;
pub mod message;
pub mod tcp;
pub mod transport;

pub use client::MockClient;
pub use engine::MockEngine;
pub use message::Message;
pub use tcp::{PeerDirectory, TcpTransport, serve};
pub use transport::{EngineConfig, MessageHandler, Transport, deliver_with_retry};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Invalid peer entry: {0}")]
    InvalidPeer(String),

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
