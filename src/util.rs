//! Small filesystem helpers shared by the allocator and the disposal engine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use faccess::PathExt;

use crate::error::ValidationError;
use crate::MAX_RETENTION_DAYS;

/// Characters Windows refuses in folder names.
const ILLEGAL_FOLDER_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Format a byte count with binary prefixes and one decimal place.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

/// Turn a filename token into something usable as a folder name.
pub fn sanitize_folder_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if ILLEGAL_FOLDER_CHARS.contains(&c) { '-' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed.trim_matches('.').trim();

    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Check that `path` is an existing, readable and writable directory.
///
/// Returns the canonical path on success. Nothing on disk is touched.
pub fn validate_directory(path: &Path) -> Result<PathBuf, ValidationError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ValidationError::NotFound(path.to_path_buf()));
        }
        Err(_) => return Err(ValidationError::NotReadable(path.to_path_buf())),
    };

    if !metadata.is_dir() {
        return Err(ValidationError::NotADirectory(path.to_path_buf()));
    }

    if fs::read_dir(path).is_err() {
        return Err(ValidationError::NotReadable(path.to_path_buf()));
    }

    if !path.writable() {
        return Err(ValidationError::NotWritable(path.to_path_buf()));
    }

    Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

/// Check a retention period, in days.
pub fn validate_retention_days(days: i64) -> Result<u32, ValidationError> {
    if (0..=i64::from(MAX_RETENTION_DAYS)).contains(&days) {
        Ok(days as u32)
    } else {
        Err(ValidationError::RetentionOutOfRange {
            value: days,
            max: MAX_RETENTION_DAYS,
        })
    }
}

/// Insert `_<counter>` before the extension of the last path segment.
///
/// `a/report.pdf` becomes `a/report_1.pdf`; names without an extension
/// (or dot-files) get the suffix appended.
pub fn with_counter(name: &str, counter: u32) -> String {
    let base_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[base_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = base_start + dot;
            format!("{}_{}{}", &name[..dot], counter, &name[dot..])
        }
        _ => format!("{}_{}", name, counter),
    }
}

/// First of `name`, `name_1`, `name_2`, ... for which `taken` is false.
pub fn unique_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = with_counter(name, counter);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// A path inside `dir` that does not exist yet, derived from `file_name`.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let name = unique_name(file_name, |candidate| dir.join(candidate).exists());
    dir.join(name)
}

/// Move a file, falling back to copy + delete when a rename is not possible
/// (for example across volumes). Never overwrites `to`.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", to.display()),
        ));
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if !from.exists() => Err(e),
        Err(e) => {
            tracing::debug!("rename {} failed ({}), copying instead", from.display(), e);
            let options = fs_extra::file::CopyOptions::new();
            fs_extra::file::move_file(from, to, &options)
                .map(|_| ())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        }
    }
}

/// Make a read-only file writable again.
pub fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
    }

    fs::set_permissions(path, permissions)
}
