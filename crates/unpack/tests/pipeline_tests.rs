//! End-to-end pipeline tests driven by a scripted engine.
//!
//! The engine fake writes a fixed tree instead of decompressing, which keeps
//! the full state machine (discovery, password, scratch, placement, source
//! disposition) observable on a plain tempdir.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use unpack::orchestrator::FailureStage;
use unpack::{
    CancelToken, Config, DecompressPolicy, EncryptionProbe, Engine, FailPolicy, Orchestrator,
    Outcome, SuccessPolicy, UnpackError,
};
use unpack::format::ArchiveFormat;

/// Engine fake that materializes a scripted layout on extract.
struct MockEngine {
    probe: EncryptionProbe,
    accepted: Option<&'static str>,
    layout: Vec<(&'static str, &'static str)>,
    fail_extract: bool,
    /// Flip the cancel token during extract, like a ctrl-c mid-run
    interrupt: bool,
    extract_calls: AtomicUsize,
}

impl MockEngine {
    fn extracting(layout: &[(&'static str, &'static str)]) -> Self {
        MockEngine {
            probe: EncryptionProbe::NotEncrypted,
            accepted: None,
            layout: layout.to_vec(),
            fail_extract: false,
            interrupt: false,
            extract_calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    fn probe_encryption(&self, _archive: &Path) -> Result<EncryptionProbe, UnpackError> {
        Ok(self.probe)
    }

    fn test_password(&self, _archive: &Path, password: &str) -> Result<bool, UnpackError> {
        Ok(self.accepted == Some(password))
    }

    fn extract(
        &self,
        archive: &Path,
        _format: ArchiveFormat,
        _password: &str,
        dest: &Path,
        _codepage: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<(), UnpackError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if self.interrupt {
            cancel.cancel();
        }
        if cancel.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }
        if self.fail_extract {
            return Err(UnpackError::ExtractionFailed {
                archive: archive.to_path_buf(),
                code: Some(2),
            });
        }
        for (rel, content) in &self.layout {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        Ok(())
    }
}

fn touch(dir: &Path, rel: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, b"archive bytes").unwrap();
    path
}

fn password_file(dir: &Path, lines: &[&str]) -> PathBuf {
    let path = dir.join("passwords.txt");
    let mut f = fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    path
}

fn no_scratch_residue(dir: &Path) {
    for entry in fs::read_dir(dir).unwrap() {
        let name = entry.unwrap().file_name();
        let name = name.to_string_lossy().into_owned();
        assert!(!name.starts_with("tmp_"), "scratch dir left behind: {name}");
    }
}

async fn run(config: Config, engine: Arc<MockEngine>) -> unpack::Summary {
    let orchestrator = Arc::new(Orchestrator::new(config, engine, CancelToken::new()));
    orchestrator.run().await.unwrap()
}

#[tokio::test]
async fn test_separate_policy_end_to_end() {
    let root = TempDir::new().unwrap();
    let archive = touch(root.path(), "Foo.zip");

    let engine = Arc::new(MockEngine::extracting(&[
        ("a.txt", "alpha"),
        ("sub/b.txt", "beta"),
    ]));
    let mut config = Config::new(root.path());
    config.decompress_policy = DecompressPolicy::Separate;

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.dispositions.len(), 1);
    let d = &summary.dispositions[0];
    match &d.outcome {
        Outcome::Succeeded { placed_at } => {
            assert_eq!(placed_at, &root.path().join("Foo"));
            assert_eq!(fs::read(placed_at.join("a.txt")).unwrap(), b"alpha");
            assert_eq!(fs::read(placed_at.join("sub/b.txt")).unwrap(), b"beta");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert!(!d.residue);
    // default success policy leaves the source alone
    assert!(archive.exists());
    assert_eq!(engine.calls(), 1);
    no_scratch_residue(root.path());
}

#[tokio::test]
async fn test_delete_success_policy_removes_volume_set() {
    let root = TempDir::new().unwrap();
    let main = touch(root.path(), "set.part1.rar");
    let second = touch(root.path(), "set.part2.rar");

    let engine = Arc::new(MockEngine::extracting(&[("payload.bin", "x")]));
    let mut config = Config::new(root.path());
    config.decompress_policy = DecompressPolicy::Separate;
    config.success_policy = SuccessPolicy::Delete;

    let summary = run(config, Arc::clone(&engine)).await;

    // the secondary volume is never a candidate of its own
    assert_eq!(summary.dispositions.len(), 1);
    assert_eq!(summary.succeeded().count(), 1);
    assert!(!main.exists());
    assert!(!second.exists());
    assert!(root.path().join("set").join("payload.bin").exists());
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_output_base_mirrors_scan_relative_path() {
    let root = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    touch(root.path(), "albums/Foo.zip");

    let engine = Arc::new(MockEngine::extracting(&[("track.flac", "pcm")]));
    let mut config = Config::new(root.path());
    config.output = Some(out.path().to_path_buf());
    config.decompress_policy = DecompressPolicy::Separate;

    let summary = run(config, engine).await;

    assert_eq!(summary.succeeded().count(), 1);
    let placed = out.path().join("albums").join("Foo");
    assert!(placed.join("track.flac").exists());
    // nothing lands in the scan tree
    assert!(!root.path().join("Foo").exists());
}

#[tokio::test]
async fn test_password_exhausted_quarantines_with_structure() {
    let root = TempDir::new().unwrap();
    let quarantine = TempDir::new().unwrap();
    let archive = touch(root.path(), "sub/Bar.rar");
    let pw_dir = TempDir::new().unwrap();
    let pw_file = password_file(pw_dir.path(), &["wrong1", "wrong2"]);

    let mut engine = MockEngine::extracting(&[]);
    engine.probe = EncryptionProbe::Encrypted;
    let engine = Arc::new(engine);

    let mut config = Config::new(root.path());
    config.password_file = Some(pw_file);
    config.fail_policy = FailPolicy::Move(quarantine.path().to_path_buf());

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.failed().count(), 1);
    let d = summary.failed().next().unwrap();
    match &d.outcome {
        Outcome::Failed { stage, .. } => assert_eq!(*stage, FailureStage::Password),
        other => panic!("expected failure, got {other:?}"),
    }
    // no candidate matched, so extraction never started
    assert_eq!(engine.calls(), 0);
    assert!(!archive.exists());
    assert!(quarantine.path().join("sub").join("Bar.rar").exists());
}

#[tokio::test]
async fn test_not_an_archive_is_skipped_not_quarantined() {
    let root = TempDir::new().unwrap();
    let quarantine = TempDir::new().unwrap();
    let archive = touch(root.path(), "fake.zip");
    let pw_dir = TempDir::new().unwrap();
    let pw_file = password_file(pw_dir.path(), &["pw"]);

    let mut engine = MockEngine::extracting(&[]);
    engine.probe = EncryptionProbe::NotAnArchive;
    let engine = Arc::new(engine);

    let mut config = Config::new(root.path());
    config.password_file = Some(pw_file);
    config.fail_policy = FailPolicy::Move(quarantine.path().to_path_buf());

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.skipped().count(), 1);
    assert_eq!(summary.failed().count(), 0);
    assert_eq!(engine.calls(), 0);
    assert!(archive.exists());
    assert!(!quarantine.path().join("fake.zip").exists());
}

#[tokio::test]
async fn test_extraction_failure_applies_fail_policy() {
    let root = TempDir::new().unwrap();
    let quarantine = TempDir::new().unwrap();
    let archive = touch(root.path(), "Broken.7z");

    let mut engine = MockEngine::extracting(&[]);
    engine.fail_extract = true;
    let engine = Arc::new(engine);

    let mut config = Config::new(root.path());
    config.fail_policy = FailPolicy::Move(quarantine.path().to_path_buf());

    let summary = run(config, Arc::clone(&engine)).await;

    let d = summary.failed().next().expect("one failure");
    match &d.outcome {
        Outcome::Failed { stage, .. } => assert_eq!(*stage, FailureStage::Extraction),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(engine.calls(), 1);
    assert!(!archive.exists());
    assert!(quarantine.path().join("Broken.7z").exists());
    no_scratch_residue(root.path());
}

#[tokio::test]
async fn test_same_base_name_concurrent_yields_two_folders() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "Foo.zip");
    touch(root.path(), "Foo.7z");

    let engine = Arc::new(MockEngine::extracting(&[("data.txt", "payload")]));
    let mut config = Config::new(root.path());
    config.workers = 2;
    config.decompress_policy = DecompressPolicy::Separate;

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.succeeded().count(), 2);
    let placed: Vec<&PathBuf> = summary
        .succeeded()
        .map(|d| match &d.outcome {
            Outcome::Succeeded { placed_at } => placed_at,
            other => panic!("expected success, got {other:?}"),
        })
        .collect();
    assert_ne!(placed[0], placed[1]);
    for dir in placed {
        assert!(dir.join("data.txt").exists());
    }
    assert_eq!(engine.calls(), 2);
    no_scratch_residue(root.path());
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let root = TempDir::new().unwrap();
    let archive = touch(root.path(), "Foo.zip");

    let engine = Arc::new(MockEngine::extracting(&[("a.txt", "alpha")]));
    let mut config = Config::new(root.path());
    config.dry_run = true;
    config.success_policy = SuccessPolicy::Delete;

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.skipped().count(), 1);
    match &summary.dispositions[0].outcome {
        Outcome::Skipped { reason } => assert_eq!(reason, "dry run"),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(engine.calls(), 0);
    assert!(archive.exists());
    // the scan root holds exactly the archive, nothing was created
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_precancelled_token_skips_all_candidates() {
    let root = TempDir::new().unwrap();
    let first = touch(root.path(), "Foo.zip");
    let second = touch(root.path(), "Bar.7z");

    let engine = Arc::new(MockEngine::extracting(&[("a.txt", "alpha")]));
    let mut config = Config::new(root.path());
    config.success_policy = SuccessPolicy::Delete;

    let cancel = CancelToken::new();
    cancel.cancel();
    let orchestrator = Arc::new(Orchestrator::new(config, Arc::<MockEngine>::clone(&engine), cancel));
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.dispositions.len(), 2);
    assert_eq!(summary.skipped().count(), 2);
    assert_eq!(engine.calls(), 0);
    // nothing was touched: both sources stay, nothing else appears
    assert!(first.exists());
    assert!(second.exists());
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_interrupt_during_extraction_skips_without_quarantine() {
    let root = TempDir::new().unwrap();
    let quarantine = TempDir::new().unwrap();
    let archive = touch(root.path(), "Big.rar");

    let mut engine = MockEngine::extracting(&[("a.txt", "alpha")]);
    engine.interrupt = true;
    let engine = Arc::new(engine);

    let mut config = Config::new(root.path());
    config.fail_policy = FailPolicy::Move(quarantine.path().to_path_buf());

    let summary = run(config, Arc::clone(&engine)).await;

    assert_eq!(summary.skipped().count(), 1);
    assert_eq!(summary.failed().count(), 0);
    match &summary.dispositions[0].outcome {
        Outcome::Skipped { reason } => assert_eq!(reason, "interrupted"),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(engine.calls(), 1);
    // interruption is not a failure: the source stays put
    assert!(archive.exists());
    assert_eq!(fs::read_dir(quarantine.path()).unwrap().count(), 0);
    no_scratch_residue(root.path());
}

#[tokio::test]
async fn test_collect_policy_small_tree_goes_direct() {
    let root = TempDir::new().unwrap();
    touch(root.path(), "One.zip");

    let engine = Arc::new(MockEngine::extracting(&[("single.iso", "image")]));
    let config = Config::new(root.path()); // default 2-collect

    let summary = run(config, engine).await;

    assert_eq!(summary.succeeded().count(), 1);
    // one item is below the threshold, so no wrapping folder
    assert!(root.path().join("single.iso").exists());
    assert!(!root.path().join("One").exists());
}
