//! Retention cleanup: scan for expired files and hand each one to the
//! configured strategy.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::archive::{Archiver, ARCHIVE_DIR};
use crate::error::{DisposalError, ValidationError};
use crate::recycle::{RecycleBin, RECYCLE_DIR};
use crate::scanner::{FileDescriptor, Scanner};
use crate::util::{clear_readonly, format_size};

/// How expired files are removed. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposalMode {
    /// Compress into a dated zip container, then delete.
    Archive,
    /// Move into the holding directory; recoverable until purged.
    Recycle,
    Permanent,
}

impl fmt::Display for DisposalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Archive => "archive",
            Self::Recycle => "recycle",
            Self::Permanent => "permanent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Preview,
    Live,
}

/// State of a log record. The record's own flags decide; a pending record
/// whose storage vanished is reported as `Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordStatus {
    Available,
    Restored,
    Purged,
    Missing,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "available",
            Self::Restored => "restored",
            Self::Purged => "purged",
            Self::Missing => "missing",
        };
        f.write_str(name)
    }
}

/// Outcome of a purge over one of the disposal logs.
#[derive(Debug, Default, Serialize)]
pub struct PurgeReport {
    pub purged: usize,
    pub freed_bytes: u64,
    pub failures: Vec<(PathBuf, String)>,
}

/// What one cleanup run did, or would do.
#[derive(Debug, Serialize)]
pub struct DisposalSummary {
    pub run: RunKind,
    pub mode: DisposalMode,
    pub total_found: usize,
    pub successfully_processed: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub processed: Vec<FileDescriptor>,
    pub failures: Vec<(FileDescriptor, String)>,
}

impl DisposalSummary {
    fn new(run: RunKind, mode: DisposalMode, total_found: usize) -> Self {
        Self {
            run,
            mode,
            total_found,
            successfully_processed: 0,
            failed: 0,
            total_bytes: 0,
            processed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_preview(&self) -> bool {
        self.run == RunKind::Preview
    }

    pub fn total_size(&self) -> String {
        format_size(self.total_bytes)
    }
}

enum Strategy {
    Archive(Archiver),
    Recycle(RecycleBin),
    Permanent,
}

pub struct DisposalEngine {
    working_dir: PathBuf,
    strategy: Strategy,
    scanner: Scanner,
}

impl DisposalEngine {
    /// Engine for `mode`, keeping its holding folder and logs in
    /// `working_dir`. Nothing is created until a file is disposed of.
    pub fn new(working_dir: impl Into<PathBuf>, mode: DisposalMode) -> Self {
        let working_dir = working_dir.into();
        let strategy = match mode {
            DisposalMode::Archive => Strategy::Archive(Archiver::open(&working_dir)),
            DisposalMode::Recycle => Strategy::Recycle(RecycleBin::open(&working_dir)),
            DisposalMode::Permanent => Strategy::Permanent,
        };
        Self::build(working_dir, strategy)
    }

    pub fn with_archiver(working_dir: impl Into<PathBuf>, archiver: Archiver) -> Self {
        Self::build(working_dir.into(), Strategy::Archive(archiver))
    }

    pub fn with_recycle_bin(working_dir: impl Into<PathBuf>, bin: RecycleBin) -> Self {
        Self::build(working_dir.into(), Strategy::Recycle(bin))
    }

    pub fn permanent(working_dir: impl Into<PathBuf>) -> Self {
        Self::build(working_dir.into(), Strategy::Permanent)
    }

    fn build(working_dir: PathBuf, strategy: Strategy) -> Self {
        let mut scanner = Scanner::new()
            .exclude(working_dir.join(ARCHIVE_DIR))
            .exclude(working_dir.join(RECYCLE_DIR));
        match &strategy {
            Strategy::Archive(a) => scanner = scanner.exclude(a.folder()),
            Strategy::Recycle(r) => scanner = scanner.exclude(r.folder()),
            Strategy::Permanent => {}
        }

        Self {
            working_dir,
            strategy,
            scanner,
        }
    }

    pub fn mode(&self) -> DisposalMode {
        match self.strategy {
            Strategy::Archive(_) => DisposalMode::Archive,
            Strategy::Recycle(_) => DisposalMode::Recycle,
            Strategy::Permanent => DisposalMode::Permanent,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn archiver(&self) -> Option<&Archiver> {
        match &self.strategy {
            Strategy::Archive(a) => Some(a),
            _ => None,
        }
    }

    pub fn archiver_mut(&mut self) -> Option<&mut Archiver> {
        match &mut self.strategy {
            Strategy::Archive(a) => Some(a),
            _ => None,
        }
    }

    pub fn recycle_bin(&self) -> Option<&RecycleBin> {
        match &self.strategy {
            Strategy::Recycle(r) => Some(r),
            _ => None,
        }
    }

    pub fn recycle_bin_mut(&mut self) -> Option<&mut RecycleBin> {
        match &mut self.strategy {
            Strategy::Recycle(r) => Some(r),
            _ => None,
        }
    }

    /// Expired files under `root`, never including the engine's own folders.
    pub fn scan(
        &self,
        root: &Path,
        retention_days: i64,
        recursive: bool,
    ) -> Result<Vec<FileDescriptor>, ValidationError> {
        self.scanner.scan(root, retention_days, recursive)
    }

    pub fn scan_at(
        &self,
        root: &Path,
        retention_days: i64,
        recursive: bool,
        now: DateTime<Local>,
    ) -> Result<Vec<FileDescriptor>, ValidationError> {
        self.scanner.scan_at(root, retention_days, recursive, now)
    }

    /// Scan and dispose in one go.
    pub fn cleanup(
        &mut self,
        root: &Path,
        retention_days: i64,
        recursive: bool,
        dry_run: bool,
    ) -> Result<DisposalSummary, ValidationError> {
        let files = self.scan(root, retention_days, recursive)?;
        info!(
            "{} expired files under {} (older than {} days)",
            files.len(),
            root.display(),
            retention_days
        );
        Ok(self.dispose_all(files, dry_run))
    }

    pub fn dispose_all(&mut self, files: Vec<FileDescriptor>, dry_run: bool) -> DisposalSummary {
        self.dispose_all_with(files, dry_run, |_| {})
    }

    /// Dispose of every file, calling `on_file` before each one.
    ///
    /// A failing file is recorded and the batch moves on. A dry run touches
    /// nothing and counts every file as processed.
    pub fn dispose_all_with<F>(
        &mut self,
        files: Vec<FileDescriptor>,
        dry_run: bool,
        mut on_file: F,
    ) -> DisposalSummary
    where
        F: FnMut(&FileDescriptor),
    {
        let run = if dry_run { RunKind::Preview } else { RunKind::Live };
        let mut summary = DisposalSummary::new(run, self.mode(), files.len());

        for file in files {
            on_file(&file);

            let result = if dry_run {
                debug!("would dispose of {}", file.path.display());
                Ok(())
            } else {
                self.dispose(&file)
            };

            match result {
                Ok(()) => {
                    summary.successfully_processed += 1;
                    summary.total_bytes += file.size;
                    summary.processed.push(file);
                }
                Err(e) => {
                    error!("failed to dispose of {}: {}", file.path.display(), e);
                    summary.failed += 1;
                    summary.failures.push((file, e.to_string()));
                }
            }
        }

        info!(
            "{} run ({}): {} of {} processed, {} failed, {}",
            match run {
                RunKind::Preview => "preview",
                RunKind::Live => "live",
            },
            summary.mode,
            summary.successfully_processed,
            summary.total_found,
            summary.failed,
            summary.total_size()
        );

        summary
    }

    /// Dispose of one file with the engine's strategy.
    pub fn dispose(&mut self, file: &FileDescriptor) -> Result<(), DisposalError> {
        let metadata = fs::symlink_metadata(&file.path)
            .map_err(|e| DisposalError::io(&file.path, e))?;

        if metadata.permissions().readonly() {
            clear_readonly(&file.path).map_err(|source| DisposalError::ReadOnly {
                path: file.path.clone(),
                source,
            })?;
            debug!("cleared read-only flag on {}", file.path.display());
        }

        match &mut self.strategy {
            Strategy::Archive(archiver) => archiver.archive(file).map(|_| ()),
            Strategy::Recycle(bin) => bin.recycle(file).map(|_| ()),
            Strategy::Permanent => {
                fs::remove_file(&file.path).map_err(|e| DisposalError::io(&file.path, e))?;
                info!("deleted {}", file.path.display());
                Ok(())
            }
        }
    }
}
