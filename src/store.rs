//! Persistence seams for the pattern table and the disposal logs.
//!
//! Both are whole-document stores: callers load everything once and write
//! everything back after each mutation. [`JsonFile`] is the on-disk backend,
//! [`MemoryStore`] keeps the document in memory for tests and embedders.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::allocator::PatternTable;
use crate::error::StoreError;
use crate::util::unique_destination;

/// Where the allocator keeps learned patterns.
pub trait PatternStore {
    fn load(&self) -> Result<PatternTable, StoreError>;
    fn save(&self, table: &PatternTable) -> Result<(), StoreError>;
}

/// Where a disposal strategy keeps its append-style records.
pub trait DisposalLog<R> {
    fn load(&self) -> Result<Vec<R>, StoreError>;
    fn save(&self, records: &[R]) -> Result<(), StoreError>;
}

/// A pretty-printed UTF-8 JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, or `T::default()` if the file does not exist yet.
    pub fn read<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let data = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_str(&data).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Like [`read`](Self::read), but a document that does not parse is
    /// renamed to `<name>.corrupt` so the next write cannot replace it.
    fn read_or_set_aside<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        let result = self.read();
        if let Err(StoreError::Json { .. }) = &result {
            self.set_aside();
        }
        result
    }

    fn set_aside(&self) {
        let (Some(dir), Some(name)) = (self.path.parent(), self.path.file_name()) else {
            return;
        };
        let target = unique_destination(dir, &format!("{}.corrupt", name.to_string_lossy()));
        match fs::rename(&self.path, &target) {
            Ok(()) => warn!(
                "unreadable {} kept as {}",
                self.path.display(),
                target.display()
            ),
            Err(e) => warn!("could not set aside {}: {}", self.path.display(), e),
        }
    }

    /// Replace the document. Writes a sibling temp file and renames it over
    /// the target so a crash never leaves a half-written file behind.
    pub fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, data).map_err(io_err)?;
        fs::rename(&temp_path, &self.path).map_err(io_err)?;

        Ok(())
    }
}

impl PatternStore for JsonFile {
    fn load(&self) -> Result<PatternTable, StoreError> {
        self.read_or_set_aside()
    }

    fn save(&self, table: &PatternTable) -> Result<(), StoreError> {
        self.write(table)
    }
}

impl<R: Serialize + DeserializeOwned> DisposalLog<R> for JsonFile {
    fn load(&self) -> Result<Vec<R>, StoreError> {
        self.read_or_set_aside()
    }

    fn save(&self, records: &[R]) -> Result<(), StoreError> {
        self.write(records)
    }
}

/// An in-memory document. Clones share the same contents, so a test can keep
/// a handle and inspect what the owner saved.
#[derive(Debug, Default)]
pub struct MemoryStore<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// Copy of whatever was saved last.
    pub fn snapshot(&self) -> T {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace(&self, value: T) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

impl PatternStore for MemoryStore<PatternTable> {
    fn load(&self) -> Result<PatternTable, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, table: &PatternTable) -> Result<(), StoreError> {
        self.replace(table.clone());
        Ok(())
    }
}

impl<R: Clone> DisposalLog<R> for MemoryStore<Vec<R>> {
    fn load(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &[R]) -> Result<(), StoreError> {
        self.replace(records.to_vec());
        Ok(())
    }
}

/// Serde codec for persisted timestamps.
///
/// Writes RFC 3339 with an offset. Reads that, and also offset-less ISO 8601
/// such as `2025-01-01T12:00:00.000001`, which is taken as local time.
pub mod local_time {
    use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn parse(value: &str) -> Option<DateTime<Local>> {
        if let Ok(stamp) = value.parse::<DateTime<FixedOffset>>() {
            return Some(stamp.with_timezone(&Local));
        }
        let naive = value.parse::<NaiveDateTime>().ok()?;
        Some(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .unwrap_or_else(|| Local.from_utc_datetime(&naive)),
        )
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Local>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Local};
        use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Local>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            value.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Local>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw))),
            }
        }
    }
}
