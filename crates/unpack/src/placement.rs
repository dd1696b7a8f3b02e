//! Final layout of extracted content.
//!
//! One policy is selected per run and applied per archive. Every policy has a
//! fallback, so placement can only fail on real I/O errors. Destination name
//! collisions are resolved with a suffixed folder whose creation doubles as
//! the claim; no other locking protects the shared destination tree.

use crate::error::UnpackError;
use crate::scratch::ScratchId;
use crate::shape;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Where extracted content ends up relative to the destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressPolicy {
    /// Always wrap content in a folder named after the archive
    Separate,
    /// Move content straight into the destination; wrap on any top-level
    /// name conflict
    Direct,
    /// Keep only the content-level items, discard wrapper directories
    OnlyContent,
    /// Like `OnlyContent`, but name the folder after the deepest
    /// file-bearing directory
    ContentWithFolder,
    /// Wrap when the tree holds at least N items, else behave as `Direct`
    Collect(u32),
}

impl FromStr for DecompressPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separate" => Ok(DecompressPolicy::Separate),
            "direct" => Ok(DecompressPolicy::Direct),
            "only-content" => Ok(DecompressPolicy::OnlyContent),
            "content-with-folder" => Ok(DecompressPolicy::ContentWithFolder),
            other => {
                let threshold = other
                    .strip_suffix("-collect")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| format!("invalid decompress policy: {other}"))?;
                Ok(DecompressPolicy::Collect(threshold))
            }
        }
    }
}

impl fmt::Display for DecompressPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecompressPolicy::Separate => f.write_str("separate"),
            DecompressPolicy::Direct => f.write_str("direct"),
            DecompressPolicy::OnlyContent => f.write_str("only-content"),
            DecompressPolicy::ContentWithFolder => f.write_str("content-with-folder"),
            DecompressPolicy::Collect(n) => write!(f, "{n}-collect"),
        }
    }
}

/// Applies the configured policy to one extracted tree.
pub struct PlacementEngine {
    policy: DecompressPolicy,
}

impl PlacementEngine {
    pub fn new(policy: DecompressPolicy) -> Self {
        PlacementEngine { policy }
    }

    pub fn policy(&self) -> DecompressPolicy {
        self.policy
    }

    /// Move the content of `scratch` into `dest_dir` and return the path the
    /// content landed in (the destination directory itself for direct
    /// placement).
    pub fn place(
        &self,
        scratch: &Path,
        dest_dir: &Path,
        base_name: &str,
        id: &ScratchId,
    ) -> Result<PathBuf, UnpackError> {
        fs::create_dir_all(dest_dir).map_err(UnpackError::Placement)?;

        let placed = match self.policy {
            DecompressPolicy::Separate => self.separate(scratch, dest_dir, base_name, id)?,
            DecompressPolicy::Direct => self.direct(scratch, dest_dir, base_name, id)?,
            DecompressPolicy::OnlyContent => {
                self.content(scratch, dest_dir, base_name, id, false)?
            }
            DecompressPolicy::ContentWithFolder => {
                self.content(scratch, dest_dir, base_name, id, true)?
            }
            DecompressPolicy::Collect(threshold) => {
                let shape = shape::analyze(scratch).map_err(UnpackError::Placement)?;
                if shape.total_items() >= threshold as usize {
                    self.separate(scratch, dest_dir, base_name, id)?
                } else {
                    self.direct(scratch, dest_dir, base_name, id)?
                }
            }
        };

        info!(dest = %placed.display(), policy = %self.policy, "content placed");
        Ok(placed)
    }

    /// Wrap everything in a fresh, uniquely-named folder.
    fn separate(
        &self,
        scratch: &Path,
        dest_dir: &Path,
        base_name: &str,
        id: &ScratchId,
    ) -> Result<PathBuf, UnpackError> {
        let folder =
            claim_destination(&dest_dir.join(base_name), id).map_err(UnpackError::Placement)?;
        for item in top_level(scratch)? {
            let target = folder.join(item.file_name().unwrap_or_default());
            move_entry(&item, &target).map_err(UnpackError::Placement)?;
        }
        Ok(folder)
    }

    /// Move items straight into the destination unless any top-level name
    /// already exists there. The check is deliberately not recursive; deeper
    /// same-named entries merge silently (kept from the original tool).
    fn direct(
        &self,
        scratch: &Path,
        dest_dir: &Path,
        base_name: &str,
        id: &ScratchId,
    ) -> Result<PathBuf, UnpackError> {
        let items = top_level(scratch)?;
        let conflict = items.iter().any(|item| {
            item.file_name()
                .map(|name| dest_dir.join(name).exists())
                .unwrap_or(false)
        });
        if conflict {
            debug!(dest = %dest_dir.display(), "top-level conflict, wrapping instead");
            return self.separate(scratch, dest_dir, base_name, id);
        }
        for item in items {
            let target = dest_dir.join(item.file_name().unwrap_or_default());
            move_entry(&item, &target).map_err(UnpackError::Placement)?;
        }
        Ok(dest_dir.to_path_buf())
    }

    /// Move only the content-level items; wrapper directories stay behind in
    /// scratch and are discarded with it.
    fn content(
        &self,
        scratch: &Path,
        dest_dir: &Path,
        base_name: &str,
        id: &ScratchId,
        name_after_deepest: bool,
    ) -> Result<PathBuf, UnpackError> {
        let shape = shape::analyze(scratch).map_err(UnpackError::Placement)?;
        let level = match shape.content {
            Some(level) => level,
            // Nothing was extracted; fall back to an (empty) separate folder.
            None => return self.separate(scratch, dest_dir, base_name, id),
        };

        let folder_name = if name_after_deepest {
            shape
                .deepest_file_dir
                .as_deref()
                .unwrap_or(base_name)
                .to_string()
        } else {
            base_name.to_string()
        };

        let folder =
            claim_destination(&dest_dir.join(&folder_name), id).map_err(UnpackError::Placement)?;
        for item in level.items {
            let target = folder.join(item.file_name().unwrap_or_default());
            move_entry(&item, &target).map_err(UnpackError::Placement)?;
        }

        // Discard the emptied wrapper chain; nothing else from this tree
        // reaches the destination.
        for leftover in top_level(scratch)? {
            let result = if leftover.is_dir() {
                fs::remove_dir_all(&leftover)
            } else {
                fs::remove_file(&leftover)
            };
            result.map_err(UnpackError::Placement)?;
        }
        Ok(folder)
    }
}

/// Immediate children of a directory.
fn top_level(dir: &Path) -> Result<Vec<PathBuf>, UnpackError> {
    let mut items = Vec::new();
    for entry in fs::read_dir(dir).map_err(UnpackError::Placement)? {
        items.push(entry.map_err(UnpackError::Placement)?.path());
    }
    items.sort();
    Ok(items)
}

/// Create a destination folder, resolving name collisions by appending
/// `_<suffix>` before the extension. The task's own id goes first; if even
/// that name is taken a fresh random suffix is drawn. Creating the directory
/// IS the claim, so concurrent placements can never share a folder.
pub fn claim_destination(target: &Path, id: &ScratchId) -> io::Result<PathBuf> {
    let mut candidate = target.to_path_buf();
    let mut own_id = Some(id.to_string());
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let suffix = own_id.take().unwrap_or_else(|| {
                    let nonce: u32 = rand::random();
                    format!("{nonce:08x}")
                });
                candidate = suffixed(target, &suffix);
            }
            Err(e) => return Err(e),
        }
    }
}

fn suffixed(target: &Path, suffix: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("item");
    let name = match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{stem}_{suffix}"),
    };
    target.with_file_name(name)
}

/// Rename, falling back to copy + delete across filesystems.
pub fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if crosses_devices(&e) => {
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
                fs::remove_dir_all(src)
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)
            }
        }
        Err(e) => Err(e),
    }
}

fn crosses_devices(e: &io::Error) -> bool {
    // EXDEV on unix; ErrorKind::CrossesDevices covers the rest.
    e.kind() == io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
