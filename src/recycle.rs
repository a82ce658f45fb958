//! Recycle strategy: expired files are moved into a private holding folder
//! and can be recovered until they are purged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::disposal::{PurgeReport, RecordStatus};
use crate::error::{DisposalError, RecoveryError};
use crate::scanner::FileDescriptor;
use crate::store::{DisposalLog, JsonFile};
use crate::util::move_file;

pub const RECYCLE_DIR: &str = "recycle_bin";
pub const RECOVERY_LOG: &str = "recovery_log.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecycleRecord {
    pub file_id: String,
    pub original_path: PathBuf,
    pub recycle_path: PathBuf,
    pub file_size: u64,
    /// Absent in logs written before the field existed.
    #[serde(
        default,
        with = "crate::store::local_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified_time: Option<DateTime<Local>>,
    #[serde(with = "crate::store::local_time")]
    pub deleted_time: DateTime<Local>,
    pub recovered: bool,
    #[serde(
        default,
        with = "crate::store::local_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub recovery_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub permanently_deleted: bool,
    #[serde(
        default,
        with = "crate::store::local_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub permanent_delete_time: Option<DateTime<Local>>,
}

impl RecycleRecord {
    fn is_pending(&self) -> bool {
        !self.recovered && !self.permanently_deleted
    }
}

pub struct RecycleBin {
    folder: PathBuf,
    log: Box<dyn DisposalLog<RecycleRecord>>,
    records: Vec<RecycleRecord>,
}

impl RecycleBin {
    /// Holding folder at `<working_dir>/recycle_bin` with a JSON recovery log.
    /// The folder is created by the first recycled file.
    pub fn open(working_dir: &Path) -> Self {
        let folder = working_dir.join(RECYCLE_DIR);
        let log = JsonFile::new(folder.join(RECOVERY_LOG));
        Self::with_log(folder, Box::new(log))
    }

    pub fn with_log(folder: impl Into<PathBuf>, log: Box<dyn DisposalLog<RecycleRecord>>) -> Self {
        let folder = folder.into();

        let records = log.load().unwrap_or_else(|e| {
            warn!("could not load recovery log, starting empty: {}", e);
            Vec::new()
        });
        info!("recycle folder: {}", folder.display());

        Self {
            folder,
            log,
            records,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn records(&self) -> &[RecycleRecord] {
        &self.records
    }

    fn save(&self) {
        if let Err(e) = self.log.save(&self.records) {
            warn!("could not save recovery log: {}", e);
        }
    }

    /// A holding-folder name that no file or record uses yet.
    fn next_id(&self, base_name: &str) -> String {
        let mut stamp = Local::now();
        loop {
            let id = format!("{}_{}", stamp.format("%Y%m%d_%H%M%S_%6f"), base_name);
            let taken = self.folder.join(&id).exists()
                || self.records.iter().any(|r| r.file_id == id);
            if !taken {
                return id;
            }
            stamp += Duration::microseconds(1);
        }
    }

    /// Move `file` into the holding folder and log it.
    pub fn recycle(&mut self, file: &FileDescriptor) -> Result<RecycleRecord, DisposalError> {
        let base_name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let deleted_time = Local::now();
        let file_id = self.next_id(&base_name);
        let recycle_path = self.folder.join(&file_id);

        fs::create_dir_all(&self.folder).map_err(|e| DisposalError::io(&self.folder, e))?;
        move_file(&file.path, &recycle_path).map_err(|e| DisposalError::io(&file.path, e))?;

        let record = RecycleRecord {
            file_id,
            original_path: file.path.clone(),
            recycle_path,
            file_size: file.size,
            modified_time: Some(file.modified),
            deleted_time,
            recovered: false,
            recovery_time: None,
            permanently_deleted: false,
            permanent_delete_time: None,
        };
        info!(
            "recycled {} as {}",
            record.original_path.display(),
            record.file_id
        );

        self.records.push(record.clone());
        self.save();
        Ok(record)
    }

    pub fn status(&self, record: &RecycleRecord) -> RecordStatus {
        if record.permanently_deleted {
            RecordStatus::Purged
        } else if record.recovered {
            RecordStatus::Restored
        } else if !record.recycle_path.exists() {
            warn!(
                "log says {} is recoverable but {} is gone",
                record.original_path.display(),
                record.recycle_path.display()
            );
            RecordStatus::Missing
        } else {
            RecordStatus::Available
        }
    }

    /// Every record with its status, oldest first.
    pub fn list(&self) -> Vec<(&RecycleRecord, RecordStatus)> {
        self.records.iter().map(|r| (r, self.status(r))).collect()
    }

    /// Records that can still be recovered.
    pub fn list_recoverable(&self) -> Vec<&RecycleRecord> {
        self.records
            .iter()
            .filter(|r| self.status(r) == RecordStatus::Available)
            .collect()
    }

    /// Bytes held by recoverable files.
    pub fn occupied_bytes(&self) -> u64 {
        self.list_recoverable().iter().map(|r| r.file_size).sum()
    }

    /// Move a recycled file back to where it came from.
    pub fn recover(&mut self, file_id: &str) -> Result<PathBuf, RecoveryError> {
        let index = self
            .records
            .iter()
            .position(|r| r.file_id == file_id)
            .ok_or_else(|| RecoveryError::UnknownEntry(file_id.to_string()))?;

        let record = &self.records[index];
        if record.permanently_deleted {
            return Err(RecoveryError::Purged(record.original_path.clone()));
        }
        if record.recovered {
            return Err(RecoveryError::AlreadyRestored(record.original_path.clone()));
        }
        if !record.recycle_path.exists() {
            return Err(RecoveryError::StorageMissing(record.recycle_path.clone()));
        }
        if record.original_path.exists() {
            return Err(RecoveryError::Conflict(record.original_path.clone()));
        }

        let target = record.original_path.clone();
        let source = record.recycle_path.clone();
        let io_err = |source: io::Error| RecoveryError::Io {
            path: target.clone(),
            source,
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        move_file(&source, &target).map_err(io_err)?;

        let record = &mut self.records[index];
        record.recovered = true;
        record.recovery_time = Some(Local::now());
        info!("recovered {}", target.display());

        self.save();
        Ok(target)
    }

    /// Permanently delete one recycled file. Returns the bytes freed.
    pub fn purge(&mut self, file_id: &str) -> Result<u64, RecoveryError> {
        let index = self
            .records
            .iter()
            .position(|r| r.file_id == file_id)
            .ok_or_else(|| RecoveryError::UnknownEntry(file_id.to_string()))?;

        let record = &mut self.records[index];
        if record.permanently_deleted {
            return Err(RecoveryError::Purged(record.original_path.clone()));
        }
        if record.recovered {
            return Err(RecoveryError::AlreadyRestored(record.original_path.clone()));
        }

        let freed = match fs::remove_file(&record.recycle_path) {
            Ok(()) => record.file_size,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{} was already gone", record.recycle_path.display());
                0
            }
            Err(source) => {
                return Err(RecoveryError::Io {
                    path: record.recycle_path.clone(),
                    source,
                })
            }
        };

        record.permanently_deleted = true;
        record.permanent_delete_time = Some(Local::now());
        info!("purged {}", record.file_id);

        self.save();
        Ok(freed)
    }

    /// Permanently delete recycled files that were disposed before `cutoff`.
    pub fn purge_older_than(&mut self, cutoff: DateTime<Local>) -> PurgeReport {
        let mut report = PurgeReport::default();
        let now = Local::now();

        for record in self
            .records
            .iter_mut()
            .filter(|r| r.is_pending() && r.deleted_time < cutoff)
        {
            match fs::remove_file(&record.recycle_path) {
                Ok(()) => report.freed_bytes += record.file_size,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("{} was already gone", record.recycle_path.display());
                }
                Err(e) => {
                    warn!("could not delete {}: {}", record.recycle_path.display(), e);
                    report.failures.push((record.recycle_path.clone(), e.to_string()));
                    continue;
                }
            }

            record.permanently_deleted = true;
            record.permanent_delete_time = Some(now);
            report.purged += 1;
            info!("purged {}", record.file_id);
        }

        if report.purged > 0 {
            self.save();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn bin(dir: &Path) -> (RecycleBin, MemoryStore<Vec<RecycleRecord>>) {
        let log = MemoryStore::default();
        let bin = RecycleBin::with_log(dir.join(RECYCLE_DIR), Box::new(log.clone()));
        (bin, log)
    }

    fn file(dir: &Path, rel: &str, body: &str) -> FileDescriptor {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        FileDescriptor::from_path(&path).unwrap()
    }

    #[test]
    fn test_same_basename_never_collides() {
        let dir = TempDir::new().unwrap();
        let (mut bin, log) = bin(dir.path());

        let a = bin.recycle(&file(dir.path(), "one/report.txt", "1")).unwrap();
        let b = bin.recycle(&file(dir.path(), "two/report.txt", "2")).unwrap();

        assert_ne!(a.file_id, b.file_id);
        assert!(a.file_id.ends_with("_report.txt"));
        assert_eq!(fs::read_to_string(&a.recycle_path).unwrap(), "1");
        assert_eq!(fs::read_to_string(&b.recycle_path).unwrap(), "2");
        assert_eq!(log.snapshot().len(), 2);
        assert_eq!(bin.occupied_bytes(), 2);
    }

    #[test]
    fn test_recover_round_trip() {
        let dir = TempDir::new().unwrap();
        let (mut bin, log) = bin(dir.path());
        let record = bin.recycle(&file(dir.path(), "docs/a.txt", "hello")).unwrap();

        fs::remove_dir(dir.path().join("docs")).unwrap();
        let restored = bin.recover(&record.file_id).unwrap();

        assert_eq!(fs::read_to_string(restored).unwrap(), "hello");
        assert!(!record.recycle_path.exists());
        assert!(log.snapshot()[0].recovered);
        assert!(log.snapshot()[0].recovery_time.is_some());
        assert!(bin.list_recoverable().is_empty());
        assert!(matches!(
            bin.recover(&record.file_id),
            Err(RecoveryError::AlreadyRestored(_))
        ));
    }

    #[test]
    fn test_recover_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let (mut bin, _) = bin(dir.path());
        let record = bin.recycle(&file(dir.path(), "a.txt", "old")).unwrap();
        fs::write(&record.original_path, "new").unwrap();

        assert!(matches!(
            bin.recover(&record.file_id),
            Err(RecoveryError::Conflict(_))
        ));
        assert_eq!(fs::read_to_string(&record.original_path).unwrap(), "new");
        assert!(record.recycle_path.exists());
    }

    #[test]
    fn test_unknown_and_missing_entries() {
        let dir = TempDir::new().unwrap();
        let (mut bin, _) = bin(dir.path());
        assert!(matches!(bin.recover("nope"), Err(RecoveryError::UnknownEntry(_))));

        let record = bin.recycle(&file(dir.path(), "a.txt", "x")).unwrap();
        fs::remove_file(&record.recycle_path).unwrap();

        assert_eq!(bin.status(&bin.records()[0]), RecordStatus::Missing);
        assert!(matches!(
            bin.recover(&record.file_id),
            Err(RecoveryError::StorageMissing(_))
        ));
    }

    #[test]
    fn test_purge_respects_cutoff() {
        let dir = TempDir::new().unwrap();
        let (mut bin, _) = bin(dir.path());
        let record = bin.recycle(&file(dir.path(), "a.txt", "abc")).unwrap();

        let report = bin.purge_older_than(record.deleted_time);
        assert_eq!(report.purged, 0);
        assert!(record.recycle_path.exists());

        let report = bin.purge_older_than(Local::now() + Duration::seconds(1));
        assert_eq!(report.purged, 1);
        assert_eq!(report.freed_bytes, 3);
        assert!(!record.recycle_path.exists());
        assert_eq!(bin.status(&bin.records()[0]), RecordStatus::Purged);
        assert!(matches!(bin.recover(&record.file_id), Err(RecoveryError::Purged(_))));
    }

    #[test]
    fn test_purge_single_entry() {
        let dir = TempDir::new().unwrap();
        let (mut bin, log) = bin(dir.path());
        let doomed = bin.recycle(&file(dir.path(), "a.txt", "abcd")).unwrap();
        let kept = bin.recycle(&file(dir.path(), "b.txt", "b")).unwrap();

        assert_eq!(bin.purge(&doomed.file_id).unwrap(), 4);
        assert!(!doomed.recycle_path.exists());
        assert!(kept.recycle_path.exists());
        assert!(log.snapshot()[0].permanently_deleted);
        assert!(log.snapshot()[0].permanent_delete_time.is_some());
        assert_eq!(bin.list_recoverable().len(), 1);

        assert!(matches!(bin.purge(&doomed.file_id), Err(RecoveryError::Purged(_))));
        assert!(matches!(bin.purge("nope"), Err(RecoveryError::UnknownEntry(_))));

        fs::remove_file(&kept.recycle_path).unwrap();
        assert_eq!(bin.purge(&kept.file_id).unwrap(), 0);
    }

    #[test]
    fn test_folder_appears_with_first_file() {
        let dir = TempDir::new().unwrap();
        let (mut bin, _) = bin(dir.path());
        assert!(!bin.folder().exists());
        assert_eq!(bin.occupied_bytes(), 0);

        bin.recycle(&file(dir.path(), "a.txt", "x")).unwrap();
        assert!(bin.folder().is_dir());
    }

    #[test]
    fn test_reads_records_without_offsets_or_modified_time() {
        let json = r#"[{
            "file_id": "20250101_120000_000001_a.txt",
            "original_path": "/data/a.txt",
            "recycle_path": "/work/recycle_bin/20250101_120000_000001_a.txt",
            "file_size": 3,
            "deleted_time": "2025-01-01T12:00:00.000001",
            "recovered": false
        }]"#;

        let records: Vec<RecycleRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].modified_time, None);
        assert!(records[0].is_pending());
        assert_eq!(records[0].deleted_time.format("%H:%M:%S%.6f").to_string(), "12:00:00.000001");
    }
}
