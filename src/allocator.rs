//! Pattern-learning file sorter.
//!
//! Files are placed under the target root according to the folder template
//! learned for their filename signature. New signatures get an inferred
//! template and are kept in a volatile registry for review.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classifier::{instantiate, Classifier, FilenameAnalysis};
use crate::config::AllocatorConfig;
use crate::error::{AllocateError, ValidationError};
use crate::store::{JsonFile, PatternStore};
use crate::util::{move_file, unique_destination, validate_directory};

/// Examples kept per pattern; the oldest is dropped first.
pub const MAX_EXAMPLES: usize = 10;

/// Learned template for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub folder_structure: Vec<String>,
    pub examples: Vec<String>,
    pub count: u64,
    #[serde(with = "crate::store::local_time")]
    pub last_seen: DateTime<Local>,
}

/// Signature → learned template. Serialized as one JSON object.
pub type PatternTable = BTreeMap<String, PatternEntry>;

/// Result of the read-only classification step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub signature: String,
    pub known: bool,
}

/// Where a file would go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub signature: String,
    pub known: bool,
    pub folders: Vec<String>,
    pub file_name: String,
}

impl Placement {
    /// Destination directory below `root`.
    pub fn directory(&self, root: &Path) -> PathBuf {
        self.folders.iter().fold(root.to_path_buf(), |dir, f| dir.join(f))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    Moved {
        from: PathBuf,
        to: PathBuf,
        signature: String,
        known: bool,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
}

/// Summary of one pass over a folder.
#[derive(Debug, Default)]
pub struct OrganizeReport {
    pub total: usize,
    pub moved: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct FileAllocator {
    target_root: PathBuf,
    classifier: Classifier,
    /// Lowercase extensions with the leading dot. Empty accepts everything.
    extensions: HashSet<String>,
    store: Box<dyn PatternStore>,
    patterns: PatternTable,
    unknown: BTreeMap<String, FilenameAnalysis>,
}

impl FileAllocator {
    /// Create an allocator and load the pattern table eagerly.
    pub fn new(
        target_root: impl Into<PathBuf>,
        classifier: Classifier,
        store: Box<dyn PatternStore>,
    ) -> Self {
        let patterns = match store.load() {
            Ok(table) => table,
            Err(e) => {
                warn!("could not load learned patterns, starting empty: {}", e);
                PatternTable::new()
            }
        };
        debug!("loaded {} learned patterns", patterns.len());

        Self {
            target_root: target_root.into(),
            classifier,
            extensions: HashSet::new(),
            store,
            patterns,
            unknown: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(
            &config.target_folder,
            Classifier::new(&config.delimiter),
            Box::new(JsonFile::new(&config.patterns_file)),
        )
        .with_extensions(&config.supported_extensions)
    }

    /// Restrict sorting to these extensions (`pdf` or `.pdf`, any case).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| {
                let ext = ext.as_ref().trim().to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();
        self
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn analyze(&self, filename: &str) -> FilenameAnalysis {
        self.classifier.analyze(filename)
    }

    /// Signature of `filename` and whether a template exists for it.
    pub fn classify(&self, filename: &str) -> Classification {
        let analysis = self.classifier.analyze(filename);
        let known = self.patterns.contains_key(&analysis.signature);
        Classification {
            signature: analysis.signature,
            known,
        }
    }

    /// Folders and final name for `filename`, without touching any state.
    pub fn placement(&self, filename: &str) -> Placement {
        let analysis = self.classifier.analyze(filename);
        let (structure, known) = match self.patterns.get(&analysis.signature) {
            Some(entry) => (entry.folder_structure.as_slice(), true),
            None => (analysis.suggested_structure.as_slice(), false),
        };

        let folders = instantiate(structure, &analysis.tokens);
        let file_name = self.classifier.residual_name(&analysis, folders.len());

        Placement {
            signature: analysis.signature,
            known,
            folders,
            file_name,
        }
    }

    /// Record an occurrence of `filename`'s signature.
    ///
    /// A new signature gets `structure` or the inferred template. An existing
    /// one has its count and examples updated; an explicit `structure`
    /// replaces its template. The table is saved afterwards.
    pub fn learn(&mut self, filename: &str, structure: Option<Vec<String>>) -> &PatternEntry {
        let analysis = self.classifier.analyze(filename);
        let now = Local::now();

        let entry = self
            .patterns
            .entry(analysis.signature.clone())
            .and_modify(|entry| {
                entry.count += 1;
                entry.last_seen = now;
                if !entry.examples.iter().any(|e| e == filename) {
                    entry.examples.push(filename.to_string());
                    if entry.examples.len() > MAX_EXAMPLES {
                        entry.examples.remove(0);
                    }
                }
            })
            .or_insert_with(|| PatternEntry {
                folder_structure: analysis.suggested_structure.clone(),
                examples: vec![filename.to_string()],
                count: 1,
                last_seen: now,
            });

        if let Some(structure) = structure {
            entry.folder_structure = structure;
        }

        info!(
            "learned pattern {} -> {}",
            analysis.signature,
            entry.folder_structure.join("/")
        );

        if let Err(e) = self.store.save(&self.patterns) {
            warn!("could not save learned patterns: {}", e);
        }

        &self.patterns[&analysis.signature]
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn pattern(&self, signature: &str) -> Option<&PatternEntry> {
        self.patterns.get(signature)
    }

    /// Forget a learned pattern.
    pub fn delete_pattern(&mut self, signature: &str) -> Option<PatternEntry> {
        let removed = self.patterns.remove(signature);
        if removed.is_some() {
            info!("deleted pattern {}", signature);
            if let Err(e) = self.store.save(&self.patterns) {
                warn!("could not save learned patterns: {}", e);
            }
        }
        removed
    }

    /// Filenames whose signature was new when they were sorted.
    pub fn unknown_patterns(&self) -> &BTreeMap<String, FilenameAnalysis> {
        &self.unknown
    }

    pub fn clear_unknown(&mut self) {
        self.unknown.clear();
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Move one file into its place under the target root.
    pub fn organize_file(&mut self, path: &Path) -> Result<OrganizeOutcome, AllocateError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AllocateError::InvalidName(path.to_path_buf()))?;

        if !self.is_supported(path) {
            debug!("unsupported file type: {}", filename);
            return Ok(OrganizeOutcome::Skipped {
                path: path.to_path_buf(),
                reason: "unsupported file type".to_string(),
            });
        }

        let placement = self.placement(&filename);
        if !placement.known {
            info!("new filename pattern {}: {}", placement.signature, filename);
            let analysis = self.classifier.analyze(&filename);
            self.unknown.insert(filename.clone(), analysis);
        }

        let dir = placement.directory(&self.target_root);
        fs::create_dir_all(&dir).map_err(|source| AllocateError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let dest = unique_destination(&dir, &placement.file_name);
        move_file(path, &dest).map_err(|source| AllocateError::Move {
            from: path.to_path_buf(),
            to: dest.clone(),
            source,
        })?;

        self.learn(&filename, None);

        info!(
            "moved ({} pattern {}) {} -> {}",
            if placement.known { "known" } else { "new" },
            placement.signature,
            filename,
            dest.display()
        );

        Ok(OrganizeOutcome::Moved {
            from: path.to_path_buf(),
            to: dest,
            signature: placement.signature,
            known: placement.known,
        })
    }

    /// Sort every file directly inside `folder`.
    pub fn organize_folder(&mut self, folder: &Path) -> Result<OrganizeReport, ValidationError> {
        let folder = validate_directory(folder)?;
        info!("scanning {}", folder.display());

        let mut files: Vec<PathBuf> = WalkDir::new(&folder)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let mut report = OrganizeReport {
            total: files.len(),
            ..OrganizeReport::default()
        };

        for file in files {
            match self.organize_file(&file) {
                Ok(OrganizeOutcome::Moved { from, to, .. }) => report.moved.push((from, to)),
                Ok(OrganizeOutcome::Skipped { path, reason }) => {
                    report.skipped.push((path, reason))
                }
                Err(e) => {
                    tracing::error!("failed to sort {}: {}", file.display(), e);
                    report.failed.push((file, e.to_string()));
                }
            }
        }

        info!(
            "sorted {} of {} files ({} skipped, {} failed)",
            report.moved.len(),
            report.total,
            report.skipped.len(),
            report.failed.len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn allocator(root: &Path) -> (FileAllocator, MemoryStore<PatternTable>) {
        let store = MemoryStore::default();
        let allocator = FileAllocator::new(root, Classifier::default(), Box::new(store.clone()));
        (allocator, store)
    }

    #[test]
    fn test_classify_does_not_learn() {
        let dir = TempDir::new().unwrap();
        let (allocator, store) = allocator(dir.path());

        let c = allocator.classify("Contract_Finance_2024.pdf");
        assert_eq!(c.signature, "TEXT_TEXT_YEAR");
        assert!(!c.known);
        assert!(allocator.patterns().is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_first_learn_creates_one_entry() {
        let dir = TempDir::new().unwrap();
        let (mut allocator, store) = allocator(dir.path());

        let entry = allocator.learn("Contract_Finance_2024.pdf", None).clone();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.examples, vec!["Contract_Finance_2024.pdf"]);
        assert_eq!(entry.folder_structure, vec!["Contract", "Finance"]);
        assert_eq!(allocator.patterns().len(), 1);
        assert_eq!(store.snapshot().len(), 1);
        assert!(allocator.classify("Invoice_Sales_1999.pdf").known);
    }

    #[test]
    fn test_examples_are_bounded_fifo() {
        let dir = TempDir::new().unwrap();
        let (mut allocator, _) = allocator(dir.path());

        for letter in 'a'..='k' {
            allocator.learn(&format!("Doc_Team{}_2024.pdf", letter), None);
        }

        let entry = allocator.pattern("TEXT_TEXT_YEAR").unwrap();
        assert_eq!(entry.count, 11);
        assert_eq!(entry.examples.len(), MAX_EXAMPLES);
        assert_eq!(entry.examples[0], "Doc_Teamb_2024.pdf");
        assert_eq!(entry.examples[9], "Doc_Teamk_2024.pdf");
    }

    #[test]
    fn test_override_structure_is_stored() {
        let dir = TempDir::new().unwrap();
        let (mut allocator, _) = allocator(dir.path());

        let custom = vec!["Kind".to_string(), "Dept".to_string(), "Period".to_string()];
        allocator.learn("Contract_Finance_2024.pdf", Some(custom.clone()));

        assert_eq!(allocator.pattern("TEXT_TEXT_YEAR").unwrap().folder_structure, custom);
        let placement = allocator.placement("Invoice_Sales_1999.pdf");
        assert_eq!(placement.folders, vec!["Invoice", "Sales", "1999"]);
        assert_eq!(placement.file_name, "Invoice_Sales_1999.pdf");
    }

    #[test]
    fn test_unsupported_extension_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (allocator, _) = allocator(&dir.path().join("out"));
        let mut allocator = allocator.with_extensions(["pdf", ".DOCX"]);

        let source = dir.path().join("a_b_c.exe");
        fs::write(&source, "x").unwrap();

        let outcome = allocator.organize_file(&source).unwrap();
        assert!(matches!(outcome, OrganizeOutcome::Skipped { .. }));
        assert!(source.exists());
        assert!(allocator.is_supported(Path::new("x.PDF")));
        assert!(allocator.is_supported(Path::new("x.docx")));
    }

    #[test]
    fn test_delete_pattern() {
        let dir = TempDir::new().unwrap();
        let (mut allocator, store) = allocator(dir.path());
        allocator.learn("a_b.txt", None);

        assert!(allocator.delete_pattern("TEXT_TEXT").is_some());
        assert!(allocator.delete_pattern("TEXT_TEXT").is_none());
        assert!(store.snapshot().is_empty());
    }
}
