//! Per-archive state machine and batch scheduling.
//!
//! Each discovered main volume walks Discovered -> PasswordResolved ->
//! Extracted -> Placed -> Disposed, with failure exits after each step.
//! Source disposition (success policy) runs BEFORE placement: placement only
//! rearranges the already-extracted copy, so its outcome must never influence
//! what happens to the originals. Archives are processed by a bounded worker
//! pool; steps within one archive are strictly sequential.

use crate::config::{Config, FailPolicy, SuccessPolicy};
use crate::engine::{CancelToken, Engine};
use crate::error::{Result, UnpackError};
use crate::format::ArchiveFormat;
use crate::placement::{move_entry, PlacementEngine};
use crate::scratch::{ScratchDir, ScratchId};
use crate::{sfx, volume};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn};
use walkdir::WalkDir;

/// A main volume selected for processing.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveCandidate {
    pub path: PathBuf,
    pub format: ArchiveFormat,
}

/// Step at which an archive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Password,
    Extraction,
    Placement,
}

/// Final outcome for one archive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded {
        /// Directory the content was placed in
        placed_at: PathBuf,
    },
    Failed {
        stage: FailureStage,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

/// Recorded exactly once per volume set.
#[derive(Debug, Clone, Serialize)]
pub struct Disposition {
    pub archive: PathBuf,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Scratch directory held residue after placement (contract violation,
    /// surfaced as a warning)
    pub residue: bool,
}

/// Aggregated results of one run.
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub dispositions: Vec<Disposition>,
}

impl Summary {
    pub fn succeeded(&self) -> impl Iterator<Item = &Disposition> {
        self.dispositions
            .iter()
            .filter(|d| matches!(d.outcome, Outcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &Disposition> {
        self.dispositions
            .iter()
            .filter(|d| matches!(d.outcome, Outcome::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Disposition> {
        self.dispositions
            .iter()
            .filter(|d| matches!(d.outcome, Outcome::Skipped { .. }))
    }
}

/// Drives the whole batch.
pub struct Orchestrator {
    config: Config,
    engine: Arc<dyn Engine>,
    placement: PlacementEngine,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(config: Config, engine: Arc<dyn Engine>, cancel: CancelToken) -> Self {
        let placement = PlacementEngine::new(config.decompress_policy);
        Orchestrator {
            config,
            engine,
            placement,
            cancel,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Walk the scan root and collect every processable main volume.
    ///
    /// Secondary volumes are skipped outright; `.exe` candidates are kept
    /// only when the SFX detector confirms an embedded payload, with the
    /// format guess taken from the detected signature.
    pub fn discover(&self) -> Result<Vec<ArchiveCandidate>> {
        let mut candidates = Vec::new();

        if self.config.root.is_file() {
            if let Some(candidate) = self.classify(&self.config.root) {
                candidates.push(candidate);
            }
            return Ok(candidates);
        }

        for entry in WalkDir::new(&self.config.root) {
            let entry = entry.map_err(|e| {
                UnpackError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk error")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(candidate) = self.classify(entry.path()) {
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }

    fn classify(&self, path: &Path) -> Option<ArchiveCandidate> {
        if volume::is_secondary_volume(path) || !volume::is_main_volume(path) {
            return None;
        }

        let is_exe = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("exe"))
            .unwrap_or(false);

        let format = if is_exe {
            let report = sfx::inspect(path);
            if !report.is_sfx {
                return None;
            }
            report.payload_format().unwrap_or(ArchiveFormat::Unknown)
        } else {
            ArchiveFormat::from_path(path)
        };

        Some(ArchiveCandidate {
            path: path.to_path_buf(),
            format,
        })
    }

    /// Process candidates through the bounded worker pool.
    pub async fn run(self: Arc<Self>) -> Result<Summary> {
        self.run_with(|_| {}).await
    }

    /// Like [`Orchestrator::run`], invoking `on_disposition` as each archive
    /// finishes (no cross-archive ordering guarantee).
    pub async fn run_with<F>(self: Arc<Self>, mut on_disposition: F) -> Result<Summary>
    where
        F: FnMut(&Disposition),
    {
        let this = Arc::clone(&self);
        let candidates = tokio::task::spawn_blocking(move || this.discover())
            .await
            .map_err(|e| UnpackError::Tool(format!("discovery task failed: {e}")))??;

        info!(count = candidates.len(), "archives discovered");

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| UnpackError::Tool(format!("worker pool closed: {e}")))?;
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                tokio::task::spawn_blocking(move || this.process(candidate)).await
            });
        }

        let mut summary = Summary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(disposition)) => {
                    on_disposition(&disposition);
                    summary.dispositions.push(disposition);
                }
                Ok(Err(e)) => error!("worker panicked: {e}"),
                Err(e) => error!("worker task failed: {e}"),
            }
        }

        Ok(summary)
    }

    /// Run the state machine for one archive. Blocking.
    pub fn process(&self, candidate: ArchiveCandidate) -> Disposition {
        let span = info_span!("archive", path = %candidate.path.display());
        let _guard = span.enter();

        if self.cancel.is_cancelled() {
            return self.skipped(&candidate, "interrupted before start");
        }

        if self.config.dry_run {
            return self.dry_run_trace(&candidate);
        }

        // Discovered -> PasswordResolved
        let source = crate::password::PasswordSource {
            explicit: self.config.password.clone(),
            file: self.config.password_file.clone(),
        };
        let password = match crate::password::resolve(self.engine.as_ref(), &candidate.path, &source)
        {
            Ok(pw) => pw,
            Err(UnpackError::NotAnArchive(_)) => {
                info!("not an archive, discarding candidate");
                return self.skipped(&candidate, "not an archive");
            }
            Err(e @ UnpackError::PasswordExhausted(_)) => {
                self.apply_fail_policy(&candidate);
                return self.failed(&candidate, FailureStage::Password, &e);
            }
            Err(e) => {
                warn!("password resolution error: {e}");
                return self.skipped(&candidate, &format!("password resolution error: {e}"));
            }
        };

        // PasswordResolved -> Extracted
        let output_dir = self.archive_output_dir(&candidate.path);
        let scratch = match self.create_scratch(&output_dir) {
            Ok(s) => s,
            Err(e) => return self.failed(&candidate, FailureStage::Extraction, &e),
        };

        if let Err(e) = self.engine.extract(
            &candidate.path,
            candidate.format,
            &password,
            scratch.path(),
            self.config.zip_codepage,
            &self.cancel,
        ) {
            scratch.discard();
            if matches!(e, UnpackError::Interrupted) {
                return self.skipped(&candidate, "interrupted");
            }
            self.apply_fail_policy(&candidate);
            return self.failed(&candidate, FailureStage::Extraction, &e);
        }

        info!("extracted to scratch");

        // Source disposition before placement, unconditionally.
        self.apply_success_policy(&candidate);

        // Extracted -> Placed
        let base_name = volume::archive_base_name(&candidate.path);
        let placed_at = match self
            .placement
            .place(scratch.path(), &output_dir, &base_name, scratch.id())
        {
            Ok(path) => path,
            Err(e) => {
                error!("placement failed: {e}");
                scratch.discard();
                return self.failed(&candidate, FailureStage::Placement, &e);
            }
        };

        // Placed -> Disposed
        let residue = match scratch.close() {
            Ok(residue) => {
                if residue {
                    warn!("residue left in scratch after placement");
                }
                residue
            }
            Err(e) => {
                warn!("scratch cleanup failed: {e}");
                false
            }
        };

        info!(placed_at = %placed_at.display(), "archive processed");
        Disposition {
            archive: candidate.path,
            outcome: Outcome::Succeeded { placed_at },
            residue,
        }
    }

    /// Print the full decision trace without touching disk.
    fn dry_run_trace(&self, candidate: &ArchiveCandidate) -> Disposition {
        let volumes = volume::find_archive_volumes(&candidate.path).unwrap_or_default();
        let base_name = volume::archive_base_name(&candidate.path);
        let output_dir = self.archive_output_dir(&candidate.path);

        info!(
            format = %candidate.format,
            volumes = ?volumes,
            policy = %self.config.decompress_policy,
            destination = %output_dir.join(&base_name).display(),
            "[dry run] planned actions"
        );

        self.skipped(candidate, "dry run")
    }

    /// Destination directory for this archive: output base plus the
    /// archive's subdirectory relative to the scan root.
    fn archive_output_dir(&self, archive: &Path) -> PathBuf {
        let base = self.config.base_dir();
        let output = self.config.output_base();
        let rel = archive
            .parent()
            .and_then(|parent| parent.strip_prefix(&base).ok())
            .unwrap_or_else(|| Path::new(""));
        output.join(rel)
    }

    fn create_scratch(&self, output_dir: &Path) -> Result<ScratchDir> {
        std::fs::create_dir_all(output_dir)?;
        Ok(ScratchDir::create(output_dir, ScratchId::generate())?)
    }

    /// Success-policy disposition of the whole volume set.
    fn apply_success_policy(&self, candidate: &ArchiveCandidate) {
        let volumes = match volume::find_archive_volumes(&candidate.path) {
            Ok(v) => v,
            Err(e) => {
                warn!("could not enumerate volumes: {e}");
                vec![candidate.path.clone()]
            }
        };
        match &self.config.success_policy {
            SuccessPolicy::Asis => {}
            SuccessPolicy::Delete => {
                for vol in &volumes {
                    match std::fs::remove_file(vol) {
                        Ok(()) => info!(volume = %vol.display(), "deleted source volume"),
                        Err(e) => warn!(volume = %vol.display(), "could not delete: {e}"),
                    }
                }
            }
            SuccessPolicy::Move(dest) => self.move_volumes_with_structure(&volumes, dest),
        }
    }

    /// Fail-policy disposition of the whole volume set.
    fn apply_fail_policy(&self, candidate: &ArchiveCandidate) {
        if let FailPolicy::Move(dest) = &self.config.fail_policy {
            let volumes = match volume::find_archive_volumes(&candidate.path) {
                Ok(v) => v,
                Err(e) => {
                    warn!("could not enumerate volumes: {e}");
                    vec![candidate.path.clone()]
                }
            };
            self.move_volumes_with_structure(&volumes, dest);
        }
    }

    /// Move a volume set under `target_base`, re-creating each volume's
    /// directory structure relative to the scan root.
    fn move_volumes_with_structure(&self, volumes: &[PathBuf], target_base: &Path) {
        let base = self.config.base_dir();
        for vol in volumes {
            let rel = vol
                .parent()
                .and_then(|parent| parent.strip_prefix(&base).ok())
                .unwrap_or_else(|| Path::new(""));
            let target_dir = target_base.join(rel);
            if let Err(e) = std::fs::create_dir_all(&target_dir) {
                warn!(volume = %vol.display(), "could not create target dir: {e}");
                continue;
            }
            let target = target_dir.join(vol.file_name().unwrap_or_default());
            match move_entry(vol, &target) {
                Ok(()) => info!(from = %vol.display(), to = %target.display(), "moved volume"),
                Err(e) => warn!(volume = %vol.display(), "could not move: {e}"),
            }
        }
    }

    fn skipped(&self, candidate: &ArchiveCandidate, reason: &str) -> Disposition {
        Disposition {
            archive: candidate.path.clone(),
            outcome: Outcome::Skipped {
                reason: reason.to_string(),
            },
            residue: false,
        }
    }

    fn failed(
        &self,
        candidate: &ArchiveCandidate,
        stage: FailureStage,
        error: &dyn std::fmt::Display,
    ) -> Disposition {
        Disposition {
            archive: candidate.path.clone(),
            outcome: Outcome::Failed {
                stage,
                reason: error.to_string(),
            },
            residue: false,
        }
    }
}
