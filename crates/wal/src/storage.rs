//! Storage backends for the log

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// Trait for log storage backends
///
/// Implementations only append; nothing before the end is ever rewritten
/// except by `truncate`, which repairs a torn tail at open or rolls back an
/// append that failed.
pub trait LogStorage: Send + Sync {
    /// Append bytes at the end of the log (not yet durable)
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until every prior append is durable
    fn sync(&mut self) -> io::Result<()>;

    /// Current length of the log in bytes
    fn size(&mut self) -> io::Result<u64>;

    /// Read the entire log
    fn read_all(&mut self) -> io::Result<Vec<u8>>;

    /// Cut the log down to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

/// In-memory log storage for testing
///
/// Clones share the same buffer, so a clone kept by a test plays the role
/// of the disk: it survives the owner being dropped and can be reopened as
/// if the process had restarted.
#[derive(Clone, Default)]
pub struct MemoryLogStorage {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Contents as text, one record per line
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Write raw bytes, bypassing record encoding (simulates torn or corrupt writes)
    pub fn push_raw(&self, bytes: &[u8]) {
        self.bytes.lock().extend_from_slice(bytes);
    }
}

impl LogStorage for MemoryLogStorage {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.contents())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.bytes.lock().truncate(len as usize);
        Ok(())
    }
}
