//! Two-phase commit coordinator for collage transactions
//!
//! The coordinator assembles a collage out of source images owned by
//! independent participants. Each collage is one transaction, driven by its
//! own task:
//!
//! 1. `Start` is logged, then every participant is asked to vote
//! 2. Unanimous `yes` within the vote window commits, anything else aborts
//! 3. The decision is logged (and the collage produced on commit) before any
//!    participant hears of it
//! 4. The decision is re-sent until every participant has acknowledged it
//! 5. `Finish` is logged and the transaction is forgotten
//!
//! Replies reach the right task through the [`MessageRouter`]. After a
//! restart, [`Coordinator::recover`] resumes every transaction the log shows
//! as unfinished. A transaction that stops on a local error keeps its name
//! until a later recovery pass completes it.

mod config;
mod coordinator;
mod error;
mod log;
mod recovery;
mod router;
mod sink;
mod transaction;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, Result};
pub use log::{CoordinatorLog, CoordinatorRecord};
pub use recovery::{PendingTransaction, pending_transactions};
pub use router::{Inbox, MessageRouter, RouteOutcome};
pub use sink::{ArtifactSink, DirectorySink, MemorySink};
pub use transaction::{Outcome, Phase, TransactionHandle};
