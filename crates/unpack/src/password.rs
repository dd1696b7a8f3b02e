//! Password candidate selection.
//!
//! The candidate list is ordered: the explicit password first, then the
//! password-file lines, blanks skipped, duplicates removed. Verification is
//! only worth an external-tool round trip when a password file was supplied
//! AND the archive is confirmed encrypted; in every other case the explicit
//! password (or empty) is used as-is.

use crate::engine::{EncryptionProbe, Engine};
use crate::error::UnpackError;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Password selection inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct PasswordSource {
    /// Explicit password, tried first
    pub explicit: Option<String>,
    /// File with one candidate per line
    pub file: Option<std::path::PathBuf>,
}

impl PasswordSource {
    /// Build the ordered, de-duplicated candidate list.
    pub fn candidates(&self) -> std::io::Result<Vec<String>> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(pw) = &self.explicit {
            candidates.push(pw.clone());
        }
        if let Some(file) = &self.file {
            for line in fs::read_to_string(file)?.lines() {
                let line = line.trim();
                if !line.is_empty() && !candidates.iter().any(|c| c == line) {
                    candidates.push(line.to_string());
                }
            }
        }
        Ok(candidates)
    }
}

/// Resolve the password to use for `archive`.
///
/// Returns the chosen password (possibly empty). Errors:
/// - `NotAnArchive` when the encryption probe rejects the file outright,
/// - `PasswordExhausted` when no candidate matches an encrypted archive.
pub fn resolve(
    engine: &dyn Engine,
    archive: &Path,
    source: &PasswordSource,
) -> Result<String, UnpackError> {
    // Without a password file there is nothing to test against; skip the
    // external-tool call and use whatever was supplied.
    if source.file.is_none() {
        return Ok(source.explicit.clone().unwrap_or_default());
    }

    match engine.probe_encryption(archive)? {
        EncryptionProbe::NotAnArchive => {
            return Err(UnpackError::NotAnArchive(archive.to_path_buf()))
        }
        EncryptionProbe::NotEncrypted => {
            return Ok(source.explicit.clone().unwrap_or_default())
        }
        EncryptionProbe::Encrypted => {}
    }

    let candidates = source.candidates()?;
    debug!(
        archive = %archive.display(),
        count = candidates.len(),
        "testing password candidates"
    );

    for candidate in candidates {
        if engine.test_password(archive, &candidate)? {
            info!(archive = %archive.display(), "password accepted");
            return Ok(candidate);
        }
    }

    Err(UnpackError::PasswordExhausted(archive.to_path_buf()))
}
