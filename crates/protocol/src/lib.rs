//! Protocol definitions for coordinator-participant communication
//!
//! This crate defines typed message wrappers around the generic `Message`
//! type from proven-engine. Every field travels in a header except the
//! artifact bytes, which are the message body.

pub mod messages;
pub mod requests;

pub use messages::{CommitMessage, MessageKind, ParseError, transaction_id_of};
pub use requests::BuildRequest;

/// Header names shared by every message kind
pub mod header {
    pub const KIND: &str = "kind";
    pub const SENDER: &str = "sender";
    pub const TXN_ID: &str = "txn_id";
    pub const SOURCES: &str = "sources";
}
