//! End-to-end tests for retention cleanup in all three disposal modes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Local, SubsecRound};
use filekeeper::archive::{ArchiveRecord, ARCHIVE_DIR, ARCHIVE_LOG};
use filekeeper::disposal::{DisposalEngine, DisposalMode, RunKind};
use filekeeper::recycle::{RecycleBin, RecycleRecord, RECOVERY_LOG, RECYCLE_DIR};
use filekeeper::ValidationError;
use tempfile::TempDir;

/// A folder to clean plus a separate working folder for the engine.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(temp_dir.path().join("data")).expect("Failed to create data folder");
        fs::create_dir(temp_dir.path().join("work")).expect("Failed to create work folder");
        TestFixture { temp_dir }
    }

    fn data(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    fn work(&self) -> PathBuf {
        self.temp_dir.path().join("work")
    }

    fn engine(&self, mode: DisposalMode) -> DisposalEngine {
        DisposalEngine::new(self.work(), mode)
    }

    /// Create a file under the data folder with the given age.
    fn create_aged(&self, rel_path: &str, content: &str, age: Duration) -> PathBuf {
        self.create_at(rel_path, content, Local::now() - age)
    }

    fn create_at(&self, rel_path: &str, content: &str, modified: DateTime<Local>) -> PathBuf {
        let path = self.data().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(&path, content).expect("Failed to write file");
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
        path
    }

    fn archive_log(&self) -> Vec<ArchiveRecord> {
        let path = self.work().join(ARCHIVE_DIR).join(ARCHIVE_LOG);
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn recovery_log(&self) -> Vec<RecycleRecord> {
        let path = self.work().join(RECYCLE_DIR).join(RECOVERY_LOG);
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

fn zip_entries(path: &Path) -> usize {
    zip::ZipArchive::new(File::open(path).unwrap()).unwrap().len()
}

#[test]
fn test_boundary_file_is_kept() {
    let fx = TestFixture::new();
    let now = Local::now().trunc_subsecs(0);
    let edge = now - Duration::days(10);

    fx.create_at("edge.txt", "e", edge);
    fx.create_at("past.txt", "p", edge - Duration::seconds(1));

    let engine = fx.engine(DisposalMode::Permanent);
    let expired = engine.scan_at(&fx.data(), 10, true, now).unwrap();

    assert_eq!(expired.len(), 1);
    assert!(expired[0].path.ends_with("past.txt"));
}

#[test]
fn test_dry_run_matches_real_run() {
    let fx = TestFixture::new();
    fx.create_aged("a.log", "aaaa", Duration::days(40));
    fx.create_aged("sub/b.log", "bb", Duration::days(50));
    fx.create_aged("fresh.log", "new", Duration::days(1));

    let mut engine = fx.engine(DisposalMode::Recycle);
    let preview = engine.cleanup(&fx.data(), 30, true, true).unwrap();

    assert_eq!(preview.run, RunKind::Preview);
    assert!(fx.data().join("a.log").exists());
    assert!(!fx.work().join(RECYCLE_DIR).exists());

    let live = engine.cleanup(&fx.data(), 30, true, false).unwrap();
    assert_eq!(live.run, RunKind::Live);
    assert_eq!(preview.total_found, live.total_found);
    assert_eq!(preview.total_bytes, live.total_bytes);
    assert_eq!(live.total_found, 2);
    assert_eq!(live.total_bytes, 6);
    assert!(!fx.data().join("a.log").exists());
    assert!(fx.data().join("fresh.log").exists());
    assert_eq!(fx.recovery_log().len(), 2);
}

#[test]
fn test_zero_days_takes_every_past_file() {
    let fx = TestFixture::new();
    fx.create_aged("a.txt", "a", Duration::seconds(5));
    fx.create_aged("b.txt", "b", Duration::days(3));

    let mut engine = fx.engine(DisposalMode::Permanent);
    let summary = engine.cleanup(&fx.data(), 0, true, true).unwrap();
    assert_eq!(summary.total_found, 2);
}

#[test]
fn test_archive_same_day_uses_one_container() {
    let fx = TestFixture::new();
    fx.create_aged("docs/a.txt", "alpha", Duration::days(100));
    fx.create_aged("docs/b.txt", "beta", Duration::days(100));

    let mut engine = fx.engine(DisposalMode::Archive);
    let summary = engine.cleanup(&fx.data(), 30, true, false).unwrap();
    assert_eq!(summary.successfully_processed, 2);

    let containers: Vec<_> = fs::read_dir(fx.work().join(ARCHIVE_DIR))
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|x| x == "zip"))
        .collect();
    assert_eq!(containers.len(), 1);
    assert_eq!(zip_entries(&containers[0].path()), 2);

    let log = fx.archive_log();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|r| !r.extracted));
    assert!(log[0].archive_internal_path.ends_with("docs/a.txt"));
    assert!(!fx.data().join("docs/a.txt").exists());
}

#[test]
fn test_archive_then_extract() {
    let fx = TestFixture::new();
    let original = fx.create_aged("report.txt", "quarterly", Duration::days(90));

    let mut engine = fx.engine(DisposalMode::Archive);
    engine.cleanup(&fx.data(), 30, true, false).unwrap();
    assert!(!original.exists());

    let archiver = engine.archiver_mut().unwrap();
    let record = archiver.records()[0].clone();
    let restored = archiver
        .extract(&record.archive_path, &record.archive_internal_path)
        .unwrap();

    assert_eq!(fs::read_to_string(restored).unwrap(), "quarterly");
    assert!(fx.archive_log()[0].extracted);
    assert!(fx.archive_log()[0].extract_time.is_some());
}

#[test]
fn test_recycle_same_basename_twice() {
    let fx = TestFixture::new();
    fx.create_aged("one/notes.txt", "1", Duration::days(60));
    fx.create_aged("two/notes.txt", "2", Duration::days(60));

    let mut engine = fx.engine(DisposalMode::Recycle);
    let summary = engine.cleanup(&fx.data(), 30, true, false).unwrap();
    assert_eq!(summary.successfully_processed, 2);

    let log = fx.recovery_log();
    assert_eq!(log.len(), 2);
    assert_ne!(log[0].file_id, log[1].file_id);
    assert!(log.iter().all(|r| r.recycle_path.exists()));
}

#[test]
fn test_recycle_then_recover() {
    let fx = TestFixture::new();
    let original = fx.create_aged("keep/me.txt", "precious", Duration::days(60));

    let mut engine = fx.engine(DisposalMode::Recycle);
    engine.cleanup(&fx.data(), 30, true, false).unwrap();
    assert!(!original.exists());

    let bin = engine.recycle_bin_mut().unwrap();
    let file_id = bin.records()[0].file_id.clone();
    bin.recover(&file_id).unwrap();

    assert_eq!(fs::read_to_string(&original).unwrap(), "precious");
    assert!(fx.recovery_log()[0].recovered);
}

#[test]
fn test_archive_dry_run_creates_nothing() {
    let fx = TestFixture::new();
    fx.create_aged("old.txt", "x", Duration::days(60));

    let mut engine = fx.engine(DisposalMode::Archive);
    let summary = engine.cleanup(&fx.data(), 30, true, true).unwrap();

    assert_eq!(summary.total_found, 1);
    assert_eq!(fs::read_dir(fx.work()).unwrap().count(), 0);
}

#[test]
fn test_recovery_log_from_older_tool_is_kept() {
    let fx = TestFixture::new();
    let folder = fx.work().join(RECYCLE_DIR);
    fs::create_dir_all(&folder).unwrap();
    let held = folder.join("20250101_120000_000001_old.txt");
    fs::write(&held, "old").unwrap();
    let legacy = format!(
        r#"[{{
  "file_id": "20250101_120000_000001_old.txt",
  "original_path": {},
  "recycle_path": {},
  "file_size": 3,
  "modified_time": "2024-12-01T08:00:00",
  "deleted_time": "2025-01-01T12:00:00.000001",
  "recovered": false
}}]"#,
        serde_json::to_string(&fx.data().join("old.txt")).unwrap(),
        serde_json::to_string(&held).unwrap()
    );
    fs::write(folder.join(RECOVERY_LOG), legacy).unwrap();

    fx.create_aged("new.txt", "new", Duration::days(60));
    let mut engine = fx.engine(DisposalMode::Recycle);
    engine.cleanup(&fx.data(), 30, true, false).unwrap();

    let log = fx.recovery_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].file_id, "20250101_120000_000001_old.txt");

    let mut bin = RecycleBin::open(&fx.work());
    bin.recover("20250101_120000_000001_old.txt").unwrap();
    assert_eq!(fs::read_to_string(fx.data().join("old.txt")).unwrap(), "old");
}

#[test]
fn test_unreadable_recovery_log_is_set_aside() {
    let fx = TestFixture::new();
    let folder = fx.work().join(RECYCLE_DIR);
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join(RECOVERY_LOG), "[{ truncated").unwrap();

    fx.create_aged("a.txt", "a", Duration::days(60));
    let mut engine = fx.engine(DisposalMode::Recycle);
    engine.cleanup(&fx.data(), 30, true, false).unwrap();

    let kept = folder.join(format!("{}.corrupt", RECOVERY_LOG));
    assert_eq!(fs::read_to_string(kept).unwrap(), "[{ truncated");
    assert_eq!(fx.recovery_log().len(), 1);
}

#[test]
fn test_permanent_mode_writes_no_log() {
    let fx = TestFixture::new();
    let path = fx.create_aged("old.bin", "x", Duration::days(400));

    let mut engine = fx.engine(DisposalMode::Permanent);
    let summary = engine.cleanup(&fx.data(), 365, true, false).unwrap();

    assert_eq!(summary.successfully_processed, 1);
    assert!(!path.exists());
    assert!(!fx.work().join(ARCHIVE_DIR).exists());
    assert!(!fx.work().join(RECYCLE_DIR).exists());
}

#[test]
fn test_failure_does_not_stop_the_batch() {
    let fx = TestFixture::new();
    fx.create_aged("a.txt", "a", Duration::days(60));
    let doomed = fx.create_aged("b.txt", "b", Duration::days(60));
    fx.create_aged("c.txt", "c", Duration::days(60));

    let mut engine = fx.engine(DisposalMode::Recycle);
    let files = engine.scan(&fx.data(), 30, true).unwrap();
    assert_eq!(files.len(), 3);

    fs::remove_file(&doomed).unwrap();
    let summary = engine.dispose_all(files, false);

    assert_eq!(summary.total_found, 3);
    assert_eq!(summary.successfully_processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0.path, doomed);
    assert!(!summary.failures[0].1.is_empty());
    assert_eq!(summary.total_bytes, 2);
    assert!(!fx.data().join("c.txt").exists());
}

#[test]
fn test_holding_folder_is_never_scanned() {
    let fx = TestFixture::new();
    fx.create_aged("old.txt", "x", Duration::days(60));

    // Working folder inside the cleaned tree.
    let mut engine = DisposalEngine::new(fx.data(), DisposalMode::Recycle);
    engine.cleanup(&fx.data(), 30, true, false).unwrap();

    let again = engine.cleanup(&fx.data(), 0, true, true).unwrap();
    assert_eq!(again.total_found, 0);
}

#[test]
fn test_invalid_requests_change_nothing() {
    let fx = TestFixture::new();
    let path = fx.create_aged("old.txt", "x", Duration::days(60));
    let mut engine = fx.engine(DisposalMode::Permanent);

    assert!(matches!(
        engine.cleanup(&fx.data(), -1, true, false),
        Err(ValidationError::RetentionOutOfRange { .. })
    ));
    assert!(matches!(
        engine.cleanup(&path, 1, true, false),
        Err(ValidationError::NotADirectory(_))
    ));
    assert!(path.exists());
}

#[test]
fn test_summary_serializes_for_drivers() {
    let fx = TestFixture::new();
    fx.create_aged("old.txt", "x", Duration::days(60));

    let mut engine = fx.engine(DisposalMode::Archive);
    let summary = engine.cleanup(&fx.data(), 30, true, true).unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["run"], "preview");
    assert_eq!(json["mode"], "archive");
    assert_eq!(json["total_found"], 1);
    assert_eq!(json["processed"][0]["size"], 1);
}
