//! Scratch directory lifecycle.
//!
//! Every archive gets a uniquely-named scratch directory that is exclusively
//! owned by its worker. The `ScratchId` is generated once per task and passed
//! through wherever a unique suffix is needed.

use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Unique identity for one extraction task: millisecond stamp plus random
/// hex. Doubles as the collision suffix during placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchId {
    stamp: u128,
    nonce: u32,
}

impl ScratchId {
    pub fn generate() -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        ScratchId {
            stamp,
            nonce: rand::thread_rng().gen(),
        }
    }
}

impl fmt::Display for ScratchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:08x}", self.stamp, self.nonce)
    }
}

/// A scratch directory on disk. Created empty, consumed by placement,
/// removed by [`ScratchDir::close`].
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    id: ScratchId,
}

impl ScratchDir {
    /// Create `tmp_<id>` under `parent`.
    pub fn create(parent: &Path, id: ScratchId) -> std::io::Result<Self> {
        let path = parent.join(format!("tmp_{id}"));
        std::fs::create_dir_all(&path)?;
        Ok(ScratchDir { path, id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &ScratchId {
        &self.id
    }

    /// Remove the scratch directory.
    ///
    /// Placement is expected to have drained it; returns `true` when residue
    /// was found and force-removed, which callers surface as a warning.
    pub fn close(self) -> std::io::Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let mut entries = std::fs::read_dir(&self.path)?;
        if entries.next().is_none() {
            std::fs::remove_dir(&self.path)?;
            Ok(false)
        } else {
            warn!(path = %self.path.display(), "scratch directory not empty, force removing");
            std::fs::remove_dir_all(&self.path)?;
            Ok(true)
        }
    }

    /// Best-effort removal for failure paths.
    pub fn discard(self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), "could not remove scratch directory: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ids_are_unique() {
        let a = ScratchId::generate();
        let b = ScratchId::generate();
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_close_empty_dir() {
        let parent = TempDir::new().unwrap();
        let scratch = ScratchDir::create(parent.path(), ScratchId::generate()).unwrap();
        let path = scratch.path().to_path_buf();
        assert!(path.is_dir());

        let residue = scratch.close().unwrap();
        assert!(!residue);
        assert!(!path.exists());
    }

    #[test]
    fn test_close_flags_residue() {
        let parent = TempDir::new().unwrap();
        let scratch = ScratchDir::create(parent.path(), ScratchId::generate()).unwrap();
        std::fs::write(scratch.path().join("leftover.txt"), b"x").unwrap();
        let path = scratch.path().to_path_buf();

        let residue = scratch.close().unwrap();
        assert!(residue);
        assert!(!path.exists());
    }
}
