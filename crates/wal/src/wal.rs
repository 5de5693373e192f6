//! Typed write-ahead log

use crate::{FileLogStorage, LogStorage, Result, WalError};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::Path;

/// Result of replaying a log
#[derive(Debug)]
pub struct Replay<R> {
    /// Decoded records in log order
    pub records: Vec<R>,

    /// Lines that could not be decoded
    pub skipped: usize,
}

/// Append-only log of `R` records
///
/// One writer lock serializes appends from every transaction of a role, so
/// records from different transactions interleave whole and each one is
/// durable before the next begins.
pub struct Wal<R> {
    writer: Mutex<Writer>,
    _record: PhantomData<fn() -> R>,
}

/// Storage plus whether a failed append left bytes behind
struct Writer {
    storage: Box<dyn LogStorage>,
    poisoned: bool,
}

impl Writer {
    /// Append one line, leaving the log as it was if that fails
    fn append_line(&mut self, line: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }

        let start = self.storage.size()?;
        let written = self
            .storage
            .append(line)
            .and_then(|()| self.storage.sync());
        let Err(e) = written else {
            return Ok(());
        };

        // A partial line would swallow the next record
        if let Err(rollback) = self.storage.truncate(start) {
            tracing::error!(
                "Cannot roll back failed log append ({}), refusing further writes: {}",
                e,
                rollback
            );
            self.poisoned = true;
        }
        Err(e.into())
    }
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    /// Open a log over `storage`, dropping any torn final line
    pub fn open(storage: impl LogStorage + 'static) -> Result<Self> {
        let mut storage: Box<dyn LogStorage> = Box::new(storage);

        let bytes = storage.read_all()?;
        if let Some(&last) = bytes.last()
            && last != b'\n'
        {
            let keep = bytes
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(0, |idx| idx + 1);
            tracing::warn!(
                "Dropping torn log record of {} bytes",
                bytes.len() - keep
            );
            storage.truncate(keep as u64)?;
        }

        Ok(Self {
            writer: Mutex::new(Writer {
                storage,
                poisoned: false,
            }),
            _record: PhantomData,
        })
    }

    /// Open a file-backed log at `path`
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(FileLogStorage::open(path)?)
    }

    /// Append a record and force it to durable storage
    ///
    /// On failure nothing of the record remains in the log. If that cannot
    /// be guaranteed, every later append fails with `Poisoned`.
    pub fn append(&self, record: &R) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.writer.lock().append_line(&line)
    }

    /// Decode every record in order
    pub fn replay(&self) -> Result<Replay<R>> {
        let bytes = self.writer.lock().storage.read_all()?;

        let mut records = Vec::new();
        let mut skipped = 0;
        for (index, line) in bytes.split(|&b| b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable log record at line {}: {}", index + 1, e);
                    skipped += 1;
                }
            }
        }

        Ok(Replay { records, skipped })
    }
}
