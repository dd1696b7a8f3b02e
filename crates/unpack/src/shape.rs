//! Content-shape analysis of an extracted tree.
//!
//! Locates the real payload beneath wrapper directories: the content level is
//! the shallowest depth holding at least two sibling entries. A pure
//! one-child-per-level chain falls back to the deepest populated depth.
//! Analysis is read-only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The located payload level of an extracted tree.
#[derive(Debug, Clone)]
pub struct ContentLevel {
    /// Depth below the scratch root (immediate children are depth 1)
    pub depth: usize,
    /// Common parent directory of the items
    pub anchor: PathBuf,
    /// The entries at the content level; whole subtrees, moved as units
    pub items: Vec<PathBuf>,
}

/// Everything placement policies need to know about an extracted tree.
#[derive(Debug, Clone)]
pub struct TreeShape {
    /// Content level, absent only for an empty tree
    pub content: Option<ContentLevel>,
    /// Name of the deepest directory containing at least one file
    pub deepest_file_dir: Option<String>,
    /// Recursive file count
    pub files: usize,
    /// Recursive directory count
    pub dirs: usize,
}

impl TreeShape {
    /// Total entry count used by the N-collect threshold.
    pub fn total_items(&self) -> usize {
        self.files + self.dirs
    }
}

/// Analyze the tree rooted at `root`.
pub fn analyze(root: &Path) -> std::io::Result<TreeShape> {
    let mut by_depth: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    let mut files = 0usize;
    let mut dirs = 0usize;
    let mut deepest_file_dir: Option<(usize, String)> = None;

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk error"))
        })?;
        let depth = entry.depth();
        by_depth
            .entry(depth)
            .or_default()
            .push(entry.path().to_path_buf());

        if entry.file_type().is_dir() {
            dirs += 1;
        } else {
            files += 1;
            // Parent directory depth is entry depth - 1; depth 0 is the
            // scratch root itself, which has no usable name.
            let parent_depth = depth - 1;
            if parent_depth >= 1 {
                let name = entry
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .map(|s| s.to_string());
                if let Some(name) = name {
                    match &deepest_file_dir {
                        Some((d, _)) if *d >= parent_depth => {}
                        _ => deepest_file_dir = Some((parent_depth, name)),
                    }
                }
            }
        }
    }

    let content = locate_content_level(root, &by_depth);

    Ok(TreeShape {
        content,
        deepest_file_dir: deepest_file_dir.map(|(_, name)| name),
        files,
        dirs,
    })
}

fn locate_content_level(
    root: &Path,
    by_depth: &BTreeMap<usize, Vec<PathBuf>>,
) -> Option<ContentLevel> {
    // First depth with two or more entries wins.
    for (&depth, items) in by_depth {
        if items.len() >= 2 {
            return Some(make_level(root, depth, items.clone()));
        }
    }
    // Single-chain tree: use the deepest populated depth.
    by_depth
        .iter()
        .next_back()
        .map(|(&depth, items)| make_level(root, depth, items.clone()))
}

fn make_level(root: &Path, depth: usize, items: Vec<PathBuf>) -> ContentLevel {
    // All items at the qualifying depth share one parent: if an earlier
    // depth had held two entries the scan would have stopped there.
    let anchor = items
        .first()
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    ContentLevel {
        depth,
        anchor,
        items,
    }
}
