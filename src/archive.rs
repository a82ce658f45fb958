//! Archive strategy: expired files go into one zip container per day.
//!
//! Every archived file gets a record in `archive_log.json` next to the
//! containers. The record's `extracted`/`purged` flags are the source of
//! truth for its state.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use path_slash::PathBufExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::disposal::{PurgeReport, RecordStatus};
use crate::error::{DisposalError, RecoveryError, StoreError};
use crate::scanner::FileDescriptor;
use crate::store::{DisposalLog, JsonFile};
use crate::util::{format_size, unique_destination, unique_name};

pub const ARCHIVE_DIR: &str = "archived_files";
pub const ARCHIVE_LOG: &str = "archive_log.json";

const COMPRESSION_LEVEL: i64 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub original_path: PathBuf,
    pub archive_path: PathBuf,
    pub archive_internal_path: String,
    pub original_size: u64,
    #[serde(with = "crate::store::local_time")]
    pub modified_time: DateTime<Local>,
    #[serde(with = "crate::store::local_time")]
    pub archived_time: DateTime<Local>,
    pub extracted: bool,
    #[serde(
        default,
        with = "crate::store::local_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub extract_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub purged: bool,
    #[serde(
        default,
        with = "crate::store::local_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub purge_time: Option<DateTime<Local>>,
}

/// One file stored in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
}

/// Totals over the containers currently on disk.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ArchiveStats {
    pub containers: usize,
    pub files: usize,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl ArchiveStats {
    pub fn saved_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} containers, {} files, {} -> {} ({:.1}% saved)",
            self.containers,
            self.files,
            format_size(self.original_bytes),
            format_size(self.compressed_bytes),
            self.saved_percent()
        )
    }
}

pub struct Archiver {
    folder: PathBuf,
    log: Box<dyn DisposalLog<ArchiveRecord>>,
    records: Vec<ArchiveRecord>,
}

impl Archiver {
    /// Archiver rooted at `<working_dir>/archived_files`, logging to a JSON file.
    /// The folder is created by the first archived file.
    pub fn open(working_dir: &Path) -> Self {
        let folder = working_dir.join(ARCHIVE_DIR);
        let log = JsonFile::new(folder.join(ARCHIVE_LOG));
        Self::with_log(folder, Box::new(log))
    }

    pub fn with_log(folder: impl Into<PathBuf>, log: Box<dyn DisposalLog<ArchiveRecord>>) -> Self {
        let folder = folder.into();
        let records = log.load().unwrap_or_else(|e| {
            warn!("could not load archive log, starting empty: {}", e);
            Vec::new()
        });
        info!("archive folder: {}", folder.display());

        Self {
            folder,
            log,
            records,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    /// Container used for files archived at `when`.
    pub fn container_for(&self, when: DateTime<Local>) -> PathBuf {
        self.folder
            .join(format!("archived_files_{}.zip", when.format("%Y%m%d")))
    }

    fn save(&self) {
        if let Err(e) = self.log.save(&self.records) {
            warn!("could not save archive log: {}", e);
        }
    }

    fn try_save(&self) -> Result<(), StoreError> {
        self.log.save(&self.records)
    }

    /// Compress `file` into today's container, delete the original and log it.
    pub fn archive(&mut self, file: &FileDescriptor) -> Result<ArchiveRecord, DisposalError> {
        let archived_time = Local::now();
        let container = self.container_for(archived_time);
        let wanted = internal_path(&file.path);

        fs::create_dir_all(&self.folder).map_err(|e| DisposalError::io(&self.folder, e))?;

        let internal = append_to_container(&container, &file.path, &wanted).map_err(|source| {
            DisposalError::Archive {
                path: file.path.clone(),
                archive: container.clone(),
                source,
            }
        })?;

        fs::remove_file(&file.path).map_err(|e| {
            warn!(
                "{} was archived as {} but could not be removed",
                file.path.display(),
                internal
            );
            DisposalError::io(&file.path, e)
        })?;

        let record = ArchiveRecord {
            original_path: file.path.clone(),
            archive_path: container,
            archive_internal_path: internal,
            original_size: file.size,
            modified_time: file.modified,
            archived_time,
            extracted: false,
            extract_time: None,
            purged: false,
            purge_time: None,
        };
        info!(
            "archived {} -> {}:{}",
            record.original_path.display(),
            record.archive_path.display(),
            record.archive_internal_path
        );

        self.records.push(record.clone());
        self.save();
        Ok(record)
    }

    pub fn status(&self, record: &ArchiveRecord) -> RecordStatus {
        if record.purged {
            RecordStatus::Purged
        } else if record.extracted {
            RecordStatus::Restored
        } else if !record.archive_path.exists() {
            warn!(
                "log says {} is archived but {} is gone",
                record.original_path.display(),
                record.archive_path.display()
            );
            RecordStatus::Missing
        } else {
            RecordStatus::Available
        }
    }

    /// Every record with its status, oldest first.
    pub fn list(&self) -> Vec<(&ArchiveRecord, RecordStatus)> {
        self.records.iter().map(|r| (r, self.status(r))).collect()
    }

    /// Index of the pending record for `internal_path` in `archive_path`.
    fn pending(&self, archive_path: &Path, internal_path: &str) -> Result<usize, RecoveryError> {
        let index = self
            .records
            .iter()
            .rposition(|r| {
                r.archive_path == archive_path && r.archive_internal_path == internal_path
            })
            .ok_or_else(|| {
                RecoveryError::UnknownEntry(format!("{}:{}", archive_path.display(), internal_path))
            })?;

        let record = &self.records[index];
        if record.purged {
            return Err(RecoveryError::Purged(record.original_path.clone()));
        }
        if record.extracted {
            return Err(RecoveryError::AlreadyRestored(record.original_path.clone()));
        }
        if !record.archive_path.exists() {
            return Err(RecoveryError::StorageMissing(record.archive_path.clone()));
        }
        Ok(index)
    }

    /// Restore an archived file to its original location.
    ///
    /// Refuses to overwrite anything already there.
    pub fn extract(
        &mut self,
        archive_path: &Path,
        internal_path: &str,
    ) -> Result<PathBuf, RecoveryError> {
        let index = self.pending(archive_path, internal_path)?;
        let target = self.records[index].original_path.clone();
        if target.exists() {
            return Err(RecoveryError::Conflict(target));
        }
        self.restore(index, target)
    }

    /// Restore an archived file into `dir` under its original name, adding
    /// a `_N` counter if that name is taken.
    pub fn extract_to(
        &mut self,
        archive_path: &Path,
        internal_path: &str,
        dir: &Path,
    ) -> Result<PathBuf, RecoveryError> {
        let index = self.pending(archive_path, internal_path)?;
        let record = &self.records[index];
        let name = record
            .original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| internal_path.rsplit('/').next().map(String::from))
            .unwrap_or_default();

        fs::create_dir_all(dir).map_err(|source| RecoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let target = unique_destination(dir, &name);
        self.restore(index, target)
    }

    /// Unpack record `index` next to `target`, then rename it into place.
    /// A failed unpack leaves nothing behind.
    fn restore(&mut self, index: usize, target: PathBuf) -> Result<PathBuf, RecoveryError> {
        let archive_path = self.records[index].archive_path.clone();
        let internal_path = self.records[index].archive_internal_path.clone();
        let io_err = |source: io::Error| RecoveryError::Io {
            path: target.clone(),
            source,
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let partial = partial_path(&target);
        if let Err(e) = unpack_entry(&archive_path, &internal_path, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        if target.exists() {
            let _ = fs::remove_file(&partial);
            return Err(RecoveryError::Conflict(target.clone()));
        }
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(io_err(e));
        }

        let record = &mut self.records[index];
        record.extracted = true;
        record.extract_time = Some(Local::now());
        info!("extracted {} from {}", target.display(), archive_path.display());

        self.save();
        Ok(target)
    }

    /// Entries stored in one container.
    pub fn contents(&self, container: &Path) -> Result<Vec<ContainerEntry>, RecoveryError> {
        let file = File::open(container).map_err(|source| RecoveryError::Io {
            path: container.to_path_buf(),
            source,
        })?;
        let mut zip = ZipArchive::new(file).map_err(|source| RecoveryError::Archive {
            path: container.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip.by_index(i).map_err(|source| RecoveryError::Archive {
                path: container.to_path_buf(),
                source,
            })?;
            if entry.is_dir() {
                continue;
            }
            entries.push(ContainerEntry {
                name: entry.name().to_string(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
            });
        }
        Ok(entries)
    }

    /// Delete one container and mark everything it held as purged.
    ///
    /// Only containers in the archive folder or named by a record qualify.
    pub fn delete_container(&mut self, container: &Path) -> Result<PurgeReport, RecoveryError> {
        let logged = self.records.iter().any(|r| r.archive_path == container);
        if !logged && container.parent() != Some(self.folder.as_path()) {
            return Err(RecoveryError::UnknownEntry(container.display().to_string()));
        }

        let mut report = PurgeReport::default();
        match fs::metadata(container) {
            Ok(meta) => {
                fs::remove_file(container).map_err(|source| RecoveryError::Io {
                    path: container.to_path_buf(),
                    source,
                })?;
                report.freed_bytes = meta.len();
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && logged => {
                warn!("{} was already gone", container.display());
            }
            Err(source) => {
                return Err(RecoveryError::Io {
                    path: container.to_path_buf(),
                    source,
                })
            }
        }

        report.purged = self.mark_purged(container, Local::now());
        info!("deleted container {}", container.display());
        if report.purged > 0 {
            self.save();
        }
        Ok(report)
    }

    fn mark_purged(&mut self, container: &Path, when: DateTime<Local>) -> usize {
        let mut purged = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| !r.purged && r.archive_path == container)
        {
            record.purged = true;
            record.purge_time = Some(when);
            purged += 1;
        }
        purged
    }

    /// Delete containers whose newest entry was archived before `cutoff`.
    pub fn purge_older_than(&mut self, cutoff: DateTime<Local>) -> PurgeReport {
        let mut newest: BTreeMap<PathBuf, DateTime<Local>> = BTreeMap::new();
        for record in self.records.iter().filter(|r| !r.purged) {
            newest
                .entry(record.archive_path.clone())
                .and_modify(|t| *t = (*t).max(record.archived_time))
                .or_insert(record.archived_time);
        }

        let mut report = PurgeReport::default();
        let now = Local::now();

        for (container, last) in newest {
            if last >= cutoff {
                continue;
            }

            match fs::metadata(&container) {
                Ok(meta) => {
                    if let Err(e) = fs::remove_file(&container) {
                        warn!("could not delete {}: {}", container.display(), e);
                        report.failures.push((container, e.to_string()));
                        continue;
                    }
                    report.freed_bytes += meta.len();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("{} was already gone", container.display());
                }
                Err(e) => {
                    report.failures.push((container, e.to_string()));
                    continue;
                }
            }

            report.purged += self.mark_purged(&container, now);
            info!("purged {}", container.display());
        }

        if report.purged > 0 {
            self.save();
        }
        report
    }

    /// Drop records whose container is missing, unreadable or empty.
    pub fn prune(&mut self) -> Result<usize, StoreError> {
        let mut usable: BTreeMap<PathBuf, bool> = BTreeMap::new();
        for record in &self.records {
            usable
                .entry(record.archive_path.clone())
                .or_insert_with(|| container_len(&record.archive_path).is_some_and(|n| n > 0));
        }

        let before = self.records.len();
        self.records.retain(|r| usable.get(&r.archive_path).copied().unwrap_or(false));
        let removed = before - self.records.len();

        if removed > 0 {
            info!("pruned {} stale archive records", removed);
            self.try_save()?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> ArchiveStats {
        let mut stats = ArchiveStats::default();

        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return stats,
            Err(e) => {
                warn!("could not read {}: {}", self.folder.display(), e);
                return stats;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("zip") {
                continue;
            }

            let Ok(file) = File::open(&path) else { continue };
            let mut zip = match ZipArchive::new(file) {
                Ok(zip) => zip,
                Err(e) => {
                    warn!("skipping unreadable container {}: {}", path.display(), e);
                    continue;
                }
            };

            stats.containers += 1;
            stats.compressed_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            for i in 0..zip.len() {
                if let Ok(file) = zip.by_index(i) {
                    stats.files += 1;
                    stats.original_bytes += file.size();
                }
            }
        }

        stats
    }
}

/// Path inside the container: the original path without its root or prefix,
/// with `/` separators.
pub fn internal_path(path: &Path) -> String {
    let relative: PathBuf = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    relative.to_slash_lossy().into_owned()
}

/// Hidden sibling that an extraction is written to before the final rename.
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn unpack_entry(
    container: &Path,
    internal_path: &str,
    out_path: &Path,
) -> Result<(), RecoveryError> {
    let archive_err = |source: ZipError| RecoveryError::Archive {
        path: container.to_path_buf(),
        source,
    };
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| RecoveryError::Io { path, source }
    };

    let file = File::open(container).map_err(io_err(container))?;
    let mut zip = ZipArchive::new(file).map_err(archive_err)?;
    let mut entry = zip.by_name(internal_path).map_err(archive_err)?;

    let mut out = File::create(out_path).map_err(io_err(out_path))?;
    io::copy(&mut entry, &mut out).map_err(io_err(out_path))?;
    out.sync_all().map_err(io_err(out_path))
}

fn container_len(path: &Path) -> Option<usize> {
    let file = File::open(path).ok()?;
    ZipArchive::new(file).ok().map(|zip| zip.len())
}

/// Append `source` to `container` as `wanted` (or `wanted_N` if taken).
/// Returns the name actually used.
fn append_to_container(container: &Path, source: &Path, wanted: &str) -> Result<String, ZipError> {
    let mut input = File::open(source)?;
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let (mut writer, name) = if container.exists() {
        let existing: HashSet<String> = ZipArchive::new(File::open(container)?)?
            .file_names()
            .map(String::from)
            .collect();
        let name = unique_name(wanted, |candidate| existing.contains(candidate));

        let file = OpenOptions::new().read(true).write(true).open(container)?;
        (ZipWriter::new_append(file)?, name)
    } else {
        debug!("creating container {}", container.display());
        (ZipWriter::new(File::create(container)?), wanted.to_string())
    };

    writer.start_file(name.as_str(), options)?;
    io::copy(&mut input, &mut writer)?;
    writer.finish()?;

    Ok(name)
}
