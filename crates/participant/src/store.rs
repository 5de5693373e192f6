//! Source images owned by a participant

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for resource storage backends
pub trait ResourceStore: Send + Sync {
    /// Whether the resource exists locally
    fn exists(&self, name: &str) -> bool;

    /// Consume a resource; deleting one that is already gone succeeds
    fn delete(&self, name: &str) -> io::Result<()>;
}

/// Resources stored as files in one directory
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of a resource, if the name stays inside the directory
    fn path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return None;
        }
        Some(self.dir.join(name))
    }
}

impl ResourceStore for DirectoryStore {
    fn exists(&self, name: &str) -> bool {
        self.path(name).is_some_and(|path| path.is_file())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        let Some(path) = self.path(name) else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory resource store for testing
///
/// Clones share contents, so a test keeps one to inspect after a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    resources: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.resources.lock().insert(name.into(), bytes.into());
    }

    /// Names of the remaining resources, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.resources.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ResourceStore for MemoryStore {
    fn exists(&self, name: &str) -> bool {
        self.resources.lock().contains_key(name)
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        self.resources.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"pixels").unwrap();
        let store = DirectoryStore::new(dir.path());

        assert!(store.exists("a.jpg"));
        assert!(!store.exists("b.jpg"));
        assert!(!store.exists("../a.jpg"));

        store.delete("a.jpg").unwrap();
        assert!(!store.exists("a.jpg"));
        store.delete("a.jpg").unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new().with_resource("a.jpg", b"x".to_vec());
        let view = store.clone();

        store.delete("a.jpg").unwrap();
        store.delete("a.jpg").unwrap();
        assert!(view.names().is_empty());
    }
}
