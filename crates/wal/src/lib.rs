//! Write-ahead log for protocol state
//!
//! Each role keeps one append-only log. A record is durable when `append`
//! returns, so callers append before letting the recorded step have any
//! externally visible effect. On restart the log is replayed in order.
//!
//! Records are single JSON lines. Opening a log whose final line was cut
//! short by a crash drops that partial line before anything else is
//! appended. Lines that fail to decode during replay are skipped with a
//! warning rather than failing the whole replay.

mod error;
mod file;
mod storage;
mod wal;

pub use error::{Result, WalError};
pub use file::FileLogStorage;
pub use storage::{LogStorage, MemoryLogStorage};
pub use wal::{Replay, Wal};
