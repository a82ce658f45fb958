//! Error taxonomy shared by the allocator and the disposal engine.
//!
//! Validation errors abort an operation before anything on disk changes.
//! Disposal errors belong to a single file and end up in the batch summary.
//! Store errors are logged and the in-memory state carries on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Rejected operation parameters.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("directory does not exist: {0}")]
    NotFound(PathBuf),

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("directory is not readable: {0}")]
    NotReadable(PathBuf),

    #[error("directory is not writable: {0}")]
    NotWritable(PathBuf),

    #[error("retention days must be between 0 and {max}, got {value}")]
    RetentionOutOfRange { value: i64, max: u32 },
}

/// Failure to dispose of one file. Never aborts a batch.
#[derive(Debug, Error)]
pub enum DisposalError {
    #[error("could not clear read-only attribute on {path}: {source}")]
    ReadOnly { path: PathBuf, source: io::Error },

    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("could not append {path} to {archive}: {source}")]
    Archive {
        path: PathBuf,
        archive: PathBuf,
        source: zip::result::ZipError,
    },
}

impl DisposalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Failure of an explicit recover / extract / purge request.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no log entry matches {0}")]
    UnknownEntry(String),

    #[error("entry for {0} was already restored")]
    AlreadyRestored(PathBuf),

    #[error("entry for {0} was purged")]
    Purged(PathBuf),

    #[error("stored copy is missing: {0}")]
    StorageMissing(PathBuf),

    #[error("original location is occupied: {0}")]
    Conflict(PathBuf),

    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },
}

/// Failure to read or write a persisted JSON document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Failure to sort one file into the target tree.
#[derive(Debug, Error)]
pub enum AllocateError {
    #[error("not a file name: {0}")]
    InvalidName(PathBuf),

    #[error("could not create folder {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("could not move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}
