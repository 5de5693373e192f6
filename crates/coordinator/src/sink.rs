//! Where committed collages end up
//!
//! Producing a collage is split in two so it can be ordered around the
//! decision record: the bytes are staged (written and synced under a
//! temporary name) before `Decision(commit)` is logged, and published
//! (atomically renamed) after. A crash between the two leaves a staged
//! artifact that recovery either publishes or discards, depending on what
//! the log says.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for artifact storage backends
pub trait ArtifactSink: Send + Sync {
    /// Durably write `bytes` under a temporary name
    fn stage(&self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Make a staged artifact visible under its final name
    ///
    /// Succeeds without doing anything if it is already published.
    fn publish(&self, name: &str) -> io::Result<()>;

    /// Drop a staged artifact if there is one
    fn discard(&self, name: &str) -> io::Result<()>;

    /// Whether a published artifact exists
    fn exists(&self, name: &str) -> bool;
}

/// Artifacts stored as files in one directory
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn final_path(&self, name: &str) -> io::Result<PathBuf> {
        check_name(name)?;
        Ok(self.dir.join(name))
    }

    fn staged_path(&self, name: &str) -> io::Result<PathBuf> {
        check_name(name)?;
        Ok(self.dir.join(format!(".{}.staged", name)))
    }

    fn sync_dir(&self) -> io::Result<()> {
        File::open(&self.dir)?.sync_all()
    }
}

/// Collage names become file names and must stay inside the directory
fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid artifact name: {:?}", name),
        ));
    }
    Ok(())
}

impl ArtifactSink for DirectorySink {
    fn stage(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let staged = self.staged_path(name)?;
        let mut file = File::create(&staged)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        self.sync_dir()
    }

    fn publish(&self, name: &str) -> io::Result<()> {
        let staged = self.staged_path(name)?;
        let target = self.final_path(name)?;

        match fs::rename(&staged, &target) {
            Ok(()) => self.sync_dir(),
            Err(e) if e.kind() == io::ErrorKind::NotFound && target.exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn discard(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.staged_path(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.final_path(name).is_ok_and(|path| path.exists())
    }
}

#[derive(Default)]
struct MemoryArtifacts {
    staged: HashMap<String, Vec<u8>>,
    published: HashMap<String, Vec<u8>>,
}

/// In-memory artifact sink for testing
///
/// Clones share contents, so a test can keep one across a simulated restart.
#[derive(Clone, Default)]
pub struct MemorySink {
    artifacts: Arc<Mutex<MemoryArtifacts>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of a published artifact
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.lock().published.get(name).cloned()
    }

    pub fn is_staged(&self, name: &str) -> bool {
        self.artifacts.lock().staged.contains_key(name)
    }
}

impl ArtifactSink for MemorySink {
    fn stage(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.artifacts
            .lock()
            .staged
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn publish(&self, name: &str) -> io::Result<()> {
        let mut artifacts = self.artifacts.lock();
        match artifacts.staged.remove(name) {
            Some(bytes) => {
                artifacts.published.insert(name.to_string(), bytes);
                Ok(())
            }
            None if artifacts.published.contains_key(name) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No staged artifact {}", name),
            )),
        }
    }

    fn discard(&self, name: &str) -> io::Result<()> {
        self.artifacts.lock().staged.remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.artifacts.lock().published.contains_key(name)
    }
}
