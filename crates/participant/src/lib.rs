//! Participant side of the collage commit protocol
//!
//! A participant owns a set of source images. It never starts anything; it
//! answers vote requests and applies decisions:
//!
//! - A vote is `yes` only if the approver agrees and every requested image
//!   exists and is not already pledged to another transaction. Pledged
//!   images are logged before the `yes` goes out.
//! - A commit deletes the pledged images, an abort releases them. Either way
//!   the participant acknowledges, including for decisions it already
//!   applied.
//!
//! After a restart, [`Participant::recover`] re-pledges every image whose
//! last log record is a vote.

mod approval;
mod config;
mod error;
mod log;
mod participant;
mod recovery;
mod reservation;
mod store;

pub use approval::{ApproveAll, Approver, ConsoleApprover};
pub use config::ParticipantConfig;
pub use error::{ParticipantError, Result};
pub use log::{ParticipantLog, ParticipantRecord};
pub use participant::Participant;
pub use recovery::recover_dirty_set;
pub use reservation::DirtySet;
pub use store::{DirectoryStore, MemoryStore, ResourceStore};
