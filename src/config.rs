use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::colors;
use crate::disposal::DisposalMode;
use crate::{DEFAULT_DELIMITER, DEFAULT_RETENTION_DAYS};

/// File types the sorter picks up unless configured otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".xlsx", ".pptx", ".txt", ".doc", ".xls", ".ppt",
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff",
    ".mp4", ".avi", ".mov", ".wmv", ".flv", ".mkv",
    ".mp3", ".wav", ".flac", ".aac", ".ogg",
    ".zip", ".rar", ".7z", ".tar", ".gz",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Holds `archived_files/`, `recycle_bin/` and their logs.
    pub working_dir: PathBuf,
    pub disposal_mode: DisposalMode,
    pub retention_days: u32,
    pub include_subfolders: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub allocator: AllocatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub watch_folder: PathBuf,
    pub target_folder: PathBuf,
    pub delimiter: String,
    pub supported_extensions: Vec<String>,
    pub patterns_file: PathBuf,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filekeeper")
}

impl Default for Config {
    fn default() -> Self {
        let working_dir = data_dir();
        Self {
            log_dir: working_dir.join("logs"),
            working_dir,
            disposal_mode: DisposalMode::Recycle,
            retention_days: DEFAULT_RETENTION_DAYS,
            include_subfolders: true,
            log_level: "info".to_string(),
            allocator: AllocatorConfig::default(),
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            watch_folder: dirs::download_dir().unwrap_or_else(|| home.join("Downloads")),
            target_folder: dirs::document_dir()
                .unwrap_or_else(|| home.join("Documents"))
                .join("Sorted"),
            delimiter: DEFAULT_DELIMITER.to_string(),
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            patterns_file: data_dir().join("learned_patterns.json"),
        }
    }
}

impl Config {
    /// Get the path to the default config file
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".filekeeper.json"))
    }

    /// Backup sitting next to `path`
    pub fn backup_path(path: &Path) -> PathBuf {
        path.with_extension("json.backup")
    }

    /// Load config from `path`, or create a default one if it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path).context("Failed to write default config")?;
            return Ok(config);
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        match serde_json::from_str(&data) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("config {} is corrupted ({}), trying backup", path.display(), e);
                match Self::load_backup(path) {
                    Ok(backup) => {
                        warn!("restored config from backup");
                        Ok(backup)
                    }
                    Err(_) => Err(e)
                        .with_context(|| format!("Invalid config file {}", path.display())),
                }
            }
        }
    }

    fn load_backup(path: &Path) -> Result<Self> {
        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            anyhow::bail!("No backup file found");
        }
        let data = fs::read_to_string(&backup_path).context("Failed to read backup file")?;
        serde_json::from_str(&data).context("Failed to parse backup file")
    }

    /// Save config to `path`, keeping the previous version as a backup
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create config folder")?;
            }
        }

        if path.exists() {
            fs::copy(path, Self::backup_path(path)).context("Failed to create backup")?;
        }

        let temp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&temp_path, data).context("Failed to write temp config")?;
        fs::rename(&temp_path, path).context("Failed to finalize config")?;

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self, path: &Path) {
        println!("{}", "🔧 CURRENT CONFIGURATION".bold().color(colors::HEADER));
        println!("{}", path.display().to_string().dimmed());
        println!();

        println!("{} Working folder: {}", "•".cyan(), self.working_dir.display());
        println!("{} Disposal mode: {}", "•".cyan(), self.disposal_mode);
        println!("{} Retention: {} days", "•".cyan(), self.retention_days);
        println!(
            "{} Subfolders: {}",
            "•".cyan(),
            if self.include_subfolders { "included" } else { "skipped" }
        );
        println!("{} Log level: {} ({})", "•".cyan(), self.log_level, self.log_dir.display());

        println!();
        println!("{}", "Sorter".bold());
        println!("{} Watch folder: {}", "•".cyan(), self.allocator.watch_folder.display());
        println!("{} Target folder: {}", "•".cyan(), self.allocator.target_folder.display());
        println!("{} Delimiter: {:?}", "•".cyan(), self.allocator.delimiter);
        println!("{} Patterns: {}", "•".cyan(), self.allocator.patterns_file.display());
        println!(
            "{} File types: {}",
            "•".cyan(),
            self.allocator.supported_extensions.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("filekeeper.json");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.disposal_mode, DisposalMode::Recycle);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filekeeper.json");
        fs::write(&path, r#"{ "retention_days": 7, "disposal_mode": "archive" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.disposal_mode, DisposalMode::Archive);
        assert_eq!(config.allocator.delimiter, "_");
    }

    #[test]
    fn test_corrupted_config_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filekeeper.json");

        let mut config = Config::default();
        config.retention_days = 90;
        config.save(&path).unwrap();
        config.retention_days = 120;
        config.save(&path).unwrap();

        fs::write(&path, "{ broken").unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retention_days, 90);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupted_config_without_backup_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filekeeper.json");
        fs::write(&path, "nope").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
