//! External extraction engine contract and the 7-Zip implementation.
//!
//! The pipeline never decompresses anything itself; it shells out to an
//! engine for encryption probes, password tests and extraction. The trait
//! seam keeps tests hermetic and platform quirks below this crate.

use crate::error::UnpackError;
use crate::format::ArchiveFormat;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared cancellation flag, flipped by the interrupt handler and observed
/// by workers and in-flight engine invocations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of the "is this archive encrypted" probe.
///
/// `NotAnArchive` is its own variant: it means the candidate must be
/// discarded, not that no password worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionProbe {
    Encrypted,
    NotEncrypted,
    NotAnArchive,
}

/// Contract consumed by the pipeline; implemented by the 7z binary in
/// production and by fakes in tests.
pub trait Engine: Send + Sync {
    /// Probe whether the archive needs a password.
    fn probe_encryption(&self, archive: &Path) -> Result<EncryptionProbe, UnpackError>;

    /// Non-destructively test a password against the archive.
    fn test_password(&self, archive: &Path, password: &str) -> Result<bool, UnpackError>;

    /// Extract the archive into `dest`. Empty password is allowed. The
    /// codepage hint is honored only for ZIP-family archives. Partial output
    /// may remain in `dest` on failure; the caller cleans up.
    fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        password: &str,
        dest: &Path,
        codepage: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<(), UnpackError>;
}

/// Production engine shelling out to the `7z` executable.
pub struct SevenZip {
    binary: String,
}

impl Default for SevenZip {
    fn default() -> Self {
        SevenZip {
            binary: "7z".to_string(),
        }
    }
}

impl SevenZip {
    pub fn new(binary: impl Into<String>) -> Self {
        SevenZip {
            binary: binary.into(),
        }
    }

    /// Check that the binary can be invoked at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn run_listing(&self, archive: &Path, password: Option<&str>) -> Result<String, UnpackError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("l").arg("-slt");
        if let Some(pw) = password {
            cmd.arg(format!("-p{pw}"));
        }
        cmd.arg(archive);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| UnpackError::Tool(format!("cannot run {}: {e}", self.binary)))?;

        // 7z prints diagnostics on both streams; decode lossily and combine.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl Engine for SevenZip {
    fn probe_encryption(&self, archive: &Path) -> Result<EncryptionProbe, UnpackError> {
        // A dummy password makes encrypted archives fail fast with a
        // distinctive message.
        let output = self.run_listing(archive, Some("DUMMYPASSWORD"))?;

        if output.contains("Cannot open encrypted archive. Wrong password?") {
            return Ok(EncryptionProbe::Encrypted);
        }
        if output.contains("Cannot open the file as archive") {
            return Ok(EncryptionProbe::NotAnArchive);
        }

        // The dummy password went through; look for per-entry indicators.
        let output = self.run_listing(archive, None)?;
        if output.contains("Encrypted = +") || output.contains("Enter password") {
            return Ok(EncryptionProbe::Encrypted);
        }
        Ok(EncryptionProbe::NotEncrypted)
    }

    fn test_password(&self, archive: &Path, password: &str) -> Result<bool, UnpackError> {
        let status = Command::new(&self.binary)
            .arg("t")
            .arg(archive)
            .arg(format!("-p{password}"))
            .arg("-y")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| UnpackError::Tool(format!("cannot run {}: {e}", self.binary)))?;
        Ok(status.success())
    }

    fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        password: &str,
        dest: &Path,
        codepage: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<(), UnpackError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("x")
            .arg(archive)
            .arg(format!("-o{}", dest.display()))
            .arg(format!("-p{password}"))
            .arg("-y");
        if let (Some(cp), ArchiveFormat::Zip) = (codepage, format) {
            cmd.arg(format!("-mcp={cp}"));
        }

        debug!(archive = %archive.display(), dest = %dest.display(), "spawning extraction");

        let mut child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| UnpackError::Tool(format!("cannot run {}: {e}", self.binary)))?;

        // Poll so an interrupt can terminate the child before we exit.
        loop {
            if cancel.is_cancelled() {
                if let Err(e) = child.kill() {
                    warn!("could not kill extraction child: {e}");
                }
                let _ = child.wait();
                return Err(UnpackError::Interrupted);
            }
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => {
                    return Err(UnpackError::ExtractionFailed {
                        archive: archive.to_path_buf(),
                        code: status.code(),
                    })
                }
                None => std::thread::sleep(Duration::from_millis(100)),
            }
        }
    }
}
