//! Run configuration.

use crate::placement::DecompressPolicy;
use std::path::PathBuf;
use std::str::FromStr;

/// What happens to the original volumes after a successful extraction.
///
/// Applied before placement: source disposition never depends on where the
/// extracted copy ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Leave the volumes where they are
    Asis,
    /// Delete every volume of the set
    Delete,
    /// Move the set to this directory, preserving relative paths
    Move(PathBuf),
}

/// What happens to the volumes when an archive cannot be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPolicy {
    /// Leave the volumes where they are
    Asis,
    /// Quarantine the set under this directory, preserving relative paths
    Move(PathBuf),
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    /// File or directory to scan for archives
    pub root: PathBuf,
    /// Destination base; defaults to the scan root (or its parent for a
    /// single-file scan)
    pub output: Option<PathBuf>,
    /// Explicit password
    pub password: Option<String>,
    /// Password file, one candidate per line
    pub password_file: Option<PathBuf>,
    /// Filename codepage hint, passed to the engine for ZIP archives only
    pub zip_codepage: Option<u32>,
    /// Bounded worker pool size
    pub workers: usize,
    /// Layout policy for extracted content
    pub decompress_policy: DecompressPolicy,
    /// Disposition of sources after successful extraction
    pub success_policy: SuccessPolicy,
    /// Disposition of sources after failure
    pub fail_policy: FailPolicy,
    /// Report planned actions without touching disk
    pub dry_run: bool,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Config {
            root: root.into(),
            output: None,
            password: None,
            password_file: None,
            zip_codepage: None,
            workers: 1,
            decompress_policy: DecompressPolicy::Collect(2),
            success_policy: SuccessPolicy::Asis,
            fail_policy: FailPolicy::Asis,
            dry_run: false,
        }
    }

    /// Base directory that scan-relative paths are computed against.
    pub fn base_dir(&self) -> PathBuf {
        if self.root.is_dir() {
            self.root.clone()
        } else {
            self.root
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }

    /// Destination base for placed content.
    pub fn output_base(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| self.base_dir())
    }
}

impl FromStr for SuccessPolicy {
    type Err = String;

    /// `asis`, `delete`, or `move,<dir>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asis" => Ok(SuccessPolicy::Asis),
            "delete" => Ok(SuccessPolicy::Delete),
            other => match other.split_once(',') {
                Some(("move", dir)) if !dir.is_empty() => {
                    Ok(SuccessPolicy::Move(PathBuf::from(dir)))
                }
                _ => Err(format!("invalid success policy: {other}")),
            },
        }
    }
}

impl FromStr for FailPolicy {
    type Err = String;

    /// `asis` or `move,<dir>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asis" => Ok(FailPolicy::Asis),
            other => match other.split_once(',') {
                Some(("move", dir)) if !dir.is_empty() => Ok(FailPolicy::Move(PathBuf::from(dir))),
                _ => Err(format!("invalid fail policy: {other}")),
            },
        }
    }
}
