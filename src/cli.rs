use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::disposal::DisposalMode;

#[derive(Parser, Debug)]
#[command(
    name = "filekeeper",
    about = "Sort files by learned filename patterns and clean up expired ones",
    version,
    long_about = "filekeeper keeps folders tidy in two ways:\n\n\
                  • sort: learn folder templates from names like Contract_Finance_2024.pdf\n\
                  • clean: archive, recycle or delete files past their retention period"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.filekeeper.json)
    #[arg(long, global = true, env = "FILEKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "filekeeper=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispose of files older than the retention period
    Clean(CleanArgs),

    /// Inspect, recover or purge recycled files
    #[command(subcommand)]
    Recycle(RecycleArgs),

    /// Inspect, extract, purge or prune archived files
    #[command(subcommand)]
    Archive(ArchiveArgs),

    /// Sort the watch folder into the target folder
    Sort(SortArgs),

    /// Manage learned filename patterns
    #[command(subcommand)]
    Patterns(PatternArgs),

    /// Show configuration
    Config,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Folder to clean
    pub path: PathBuf,

    /// Keep files modified within the last N days
    #[arg(short = 'D', long)]
    pub days: Option<i64>,

    /// How expired files are removed
    #[arg(long, value_enum)]
    pub mode: Option<ModeCli>,

    /// Only look at files directly inside PATH
    #[arg(long)]
    pub no_subfolders: bool,

    /// Show what would be done without touching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompts
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Subcommand, Debug)]
pub enum RecycleArgs {
    /// List recycled files
    List {
        /// Include recovered and purged entries
        #[arg(long)]
        all: bool,
    },

    /// Move a recycled file back to its original location
    Recover {
        /// Entry number from `recycle list`
        index: usize,
    },

    /// Permanently delete one recycled file
    Delete {
        /// Entry number from `recycle list`
        index: usize,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Permanently delete recycled files
    Purge {
        /// Only files recycled more than N days ago
        #[arg(long)]
        older_than: i64,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ArchiveArgs {
    /// List archived files
    List,

    /// Show archive statistics
    Stats,

    /// Restore an archived file to its original location
    Extract {
        /// Entry number from `archive list`
        index: usize,

        /// Extract into this folder instead
        #[arg(long, value_name = "DIR")]
        to: Option<PathBuf>,
    },

    /// List the files stored in one container
    Contents {
        /// Container file name or path
        container: PathBuf,
    },

    /// Delete one container
    Delete {
        /// Container file name or path
        container: PathBuf,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete archive containers
    Purge {
        /// Only containers whose newest file is older than N days
        #[arg(long)]
        older_than: i64,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Forget log entries whose container is missing or empty
    Prune,
}

#[derive(Args, Debug)]
pub struct SortArgs {
    /// Folder to sort (default: configured watch folder)
    #[arg(long)]
    pub watch: Option<PathBuf>,

    /// Where sorted files go (default: configured target folder)
    #[arg(long)]
    pub target: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum PatternArgs {
    /// List learned patterns
    List,

    /// Learn a pattern from an example filename
    Add {
        /// Example filename, e.g. Contract_Finance_2024.pdf
        example: String,

        /// Folder template, e.g. "Type,Department"
        #[arg(long, value_delimiter = ',')]
        structure: Option<Vec<String>>,
    },

    /// Forget a learned pattern
    Delete {
        /// Signature, e.g. TEXT_TEXT_YEAR
        signature: String,
    },

    /// Show how a filename would be sorted
    Classify {
        filename: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeCli {
    /// Compress into a dated zip, then delete
    Archive,
    /// Move to the recoverable holding folder
    Recycle,
    /// Delete immediately
    Permanent,
}

impl From<ModeCli> for DisposalMode {
    fn from(mode: ModeCli) -> Self {
        match mode {
            ModeCli::Archive => DisposalMode::Archive,
            ModeCli::Recycle => DisposalMode::Recycle,
            ModeCli::Permanent => DisposalMode::Permanent,
        }
    }
}

impl Commands {
    /// Get the command name
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Clean(_) => "clean",
            Commands::Recycle(_) => "recycle",
            Commands::Archive(_) => "archive",
            Commands::Sort(_) => "sort",
            Commands::Patterns(_) => "patterns",
            Commands::Config => "config",
        }
    }
}
