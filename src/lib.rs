//! filekeeper - pattern-learning file sorter and retention cleanup tool

pub mod allocator;
pub mod archive;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod disposal;
pub mod error;
pub mod logging;
pub mod recycle;
pub mod scanner;
pub mod store;
pub mod util;

// Re-exports for easy access
pub use allocator::{
    FileAllocator, OrganizeOutcome, OrganizeReport, PatternEntry, PatternTable, Placement,
};
pub use archive::{ArchiveRecord, ArchiveStats, Archiver, ContainerEntry};
pub use classifier::{ClassRule, Classifier, FilenameAnalysis, TokenClass};
pub use cli::{Cli, Commands};
pub use config::{AllocatorConfig, Config};
pub use disposal::{
    DisposalEngine, DisposalMode, DisposalSummary, PurgeReport, RecordStatus, RunKind,
};
pub use error::{AllocateError, DisposalError, RecoveryError, StoreError, ValidationError};
pub use recycle::{RecycleBin, RecycleRecord};
pub use scanner::{FileDescriptor, Scanner};
pub use store::{DisposalLog, JsonFile, MemoryStore, PatternStore};

pub mod colors {
    use colored::Color;

    pub const SUCCESS: Color = Color::TrueColor { r: 77, g: 255, b: 157 };
    pub const HEADER: Color = Color::TrueColor { r: 157, g: 77, b: 255 };
    pub const PATH: Color = Color::TrueColor { r: 77, g: 195, b: 255 };
    pub const WARNING: Color = Color::TrueColor { r: 255, g: 217, b: 61 };
    pub const ERROR: Color = Color::TrueColor { r: 255, g: 107, b: 107 };
}

/// Current version of filekeeper
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest retention period accepted, in days
pub const MAX_RETENTION_DAYS: u32 = 3650;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Token separator used when none is configured
pub const DEFAULT_DELIMITER: &str = "_";
