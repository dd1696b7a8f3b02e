//! Error types for the decompression pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
///
/// `NotAnArchive` is an expected outcome for candidates that merely look like
/// archives (e.g. a plain `.exe`); callers discard the candidate instead of
/// recording a failure.
#[derive(Debug, Error)]
pub enum UnpackError {
    /// The external tool reports the file is not an archive at all.
    #[error("Not an archive: {0}")]
    NotAnArchive(PathBuf),

    /// Every password candidate was rejected by the archive.
    #[error("No password candidate matched: {0}")]
    PasswordExhausted(PathBuf),

    /// The extraction engine exited with a nonzero status.
    #[error("Extraction failed for {archive} (exit code {code:?})")]
    ExtractionFailed {
        /// Main volume that was handed to the engine
        archive: PathBuf,
        /// Exit code, if the process terminated normally
        code: Option<i32>,
    },

    /// An I/O error occurred while placing extracted content.
    #[error("Placement failed: {0}")]
    Placement(#[source] std::io::Error),

    /// The external tool could not be invoked at all.
    #[error("Extraction tool error: {0}")]
    Tool(String),

    /// Processing was interrupted by the user.
    #[error("Interrupted")]
    Interrupted,

    /// An I/O error outside of placement.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UnpackError>;
