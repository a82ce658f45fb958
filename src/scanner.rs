use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ValidationError;
use crate::util::{validate_directory, validate_retention_days};

/// Snapshot of one file taken during a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub accessed: Option<DateTime<Local>>,
    pub created: Option<DateTime<Local>>,
    pub read_only: bool,
}

impl FileDescriptor {
    /// Read the metadata of `path`.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Self::from_metadata(path, &metadata)
    }

    fn from_metadata(path: &Path, metadata: &fs::Metadata) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified()?.into(),
            accessed: metadata.accessed().ok().map(Into::into),
            created: metadata.created().ok().map(Into::into),
            read_only: metadata.permissions().readonly(),
        })
    }

    /// Whole days between the last modification and `now`.
    pub fn age_days(&self, now: DateTime<Local>) -> i64 {
        (now - self.modified).num_days()
    }
}

/// Oldest modification time that is still kept.
pub fn cutoff(now: DateTime<Local>, retention_days: u32) -> DateTime<Local> {
    now - Duration::days(i64::from(retention_days))
}

/// Canonical form of `path`, even when its last components do not exist
/// yet: the deepest existing ancestor is canonicalized and the rest rejoined.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Finds files whose retention period has run out.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    excluded: Vec<PathBuf>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never descend into `path` (and never report files inside it).
    pub fn exclude(mut self, path: impl AsRef<Path>) -> Self {
        self.excluded.push(resolve(path.as_ref()));
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| path.starts_with(ex))
    }

    /// Expired files under `root` as of now.
    pub fn scan(
        &self,
        root: &Path,
        retention_days: i64,
        recursive: bool,
    ) -> Result<Vec<FileDescriptor>, ValidationError> {
        self.scan_at(root, retention_days, recursive, Local::now())
    }

    /// Expired files under `root` as of `now`.
    ///
    /// A file is expired when it was modified strictly before
    /// `now - retention_days`. Results are sorted by path.
    pub fn scan_at(
        &self,
        root: &Path,
        retention_days: i64,
        recursive: bool,
        now: DateTime<Local>,
    ) -> Result<Vec<FileDescriptor>, ValidationError> {
        let days = validate_retention_days(retention_days)?;
        let root = validate_directory(root)?;
        let cutoff = cutoff(now, days);

        debug!(
            "scanning {} (recursive: {}, cutoff: {})",
            root.display(),
            recursive,
            cutoff.format("%Y-%m-%d %H:%M:%S")
        );

        let mut walker = WalkDir::new(&root).min_depth(1).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut expired = Vec::new();
        let mut seen = 0usize;

        let entries = walker
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path()));

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            seen += 1;

            let descriptor = match entry
                .metadata()
                .map_err(io::Error::from)
                .and_then(|m| FileDescriptor::from_metadata(entry.path(), &m))
            {
                Ok(d) => d,
                Err(e) => {
                    warn!("skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if descriptor.modified < cutoff {
                debug!(
                    "expired: {} (modified {})",
                    descriptor.path.display(),
                    descriptor.modified.format("%Y-%m-%d %H:%M:%S")
                );
                expired.push(descriptor);
            }
        }

        expired.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("{} of {} files expired", expired.len(), seen);

        Ok(expired)
    }
}
