//! Common types for collage transactions
//!
//! This crate defines:
//! - Transaction IDs (the name of the collage being assembled)
//! - Participant IDs (owners of source images)
//! - The commit/abort decision shared by both protocol roles
//! - Parsing of `participant:resource` source lists

mod decision;
mod participant_id;
mod sources;
mod transaction_id;

pub use decision::Decision;
pub use participant_id::ParticipantId;
pub use sources::{SourceError, SourceMap, SourceRef, partition_sources};
pub use transaction_id::TransactionId;
