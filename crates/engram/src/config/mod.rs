use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EngramError, Result};

/// Main configuration structure for Engram
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// File locations for the Core and Archive tiers
    #[serde(default)]
    pub storage: StorageConfig,
    /// Importance scoring and decay thresholds
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Near-duplicate detection and merging
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Archive restore and retention
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, or fall back to defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".engram").join("config.toml")),
            dirs::config_dir().map(|c| c.join("engram").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Read and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngramError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| EngramError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break tier invariants.
    pub fn validate(&self) -> Result<()> {
        let unit_values = [
            ("scoring.core_threshold", self.scoring.core_threshold),
            ("scoring.high_threshold", self.scoring.high_threshold),
            ("scoring.medium_threshold", self.scoring.medium_threshold),
            ("scoring.archive_threshold", self.scoring.archive_threshold),
            ("scoring.retrieval_threshold", self.scoring.retrieval_threshold),
            (
                "consolidation.similarity_threshold",
                self.consolidation.similarity_threshold,
            ),
            (
                "consolidation.recurrence_boost",
                self.consolidation.recurrence_boost,
            ),
            ("archive.restore_boost", self.archive.restore_boost),
        ];

        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngramError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if !(self.scoring.medium_threshold <= self.scoring.high_threshold
            && self.scoring.high_threshold <= self.scoring.core_threshold)
        {
            return Err(EngramError::Config(
                "scoring thresholds must satisfy medium <= high <= core".to_string(),
            ));
        }

        if self.consolidation.max_working_notes == 0 {
            return Err(EngramError::Config(
                "consolidation.max_working_notes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Where the file-backed tiers live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the core file and archive log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File name of the Core tier document
    #[serde(default = "default_core_file")]
    pub core_file: String,
    /// File name of the Archive log
    #[serde(default = "default_archive_file")]
    pub archive_file: String,
}

impl StorageConfig {
    /// Storage rooted at `data_dir` with default file names.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn core_path(&self) -> PathBuf {
        self.data_dir.join(&self.core_file)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(&self.archive_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            core_file: default_core_file(),
            archive_file: default_archive_file(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".engram"))
        .unwrap_or_else(|| PathBuf::from(".engram"))
}

fn default_core_file() -> String {
    "core_notes.md".to_string()
}

fn default_archive_file() -> String {
    "archive.jsonl".to_string()
}

/// Importance scoring thresholds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringConfig {
    /// Scores at or above this classify as core (default: 0.8)
    #[serde(default = "default_core_threshold")]
    pub core_threshold: f32,
    /// Scores at or above this classify as high (default: 0.5)
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    /// Scores at or above this classify as medium (default: 0.3)
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f32,
    /// Decayed scores below this are archived (default: 0.05)
    #[serde(default = "default_archive_threshold")]
    pub archive_threshold: f32,
    /// Decayed scores must exceed this to be retrieved (default: 0.2)
    #[serde(default = "default_retrieval_threshold")]
    pub retrieval_threshold: f32,
    /// Minimum access count for promotion (default: 3)
    #[serde(default = "default_promotion_min_access")]
    pub promotion_min_access: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            core_threshold: default_core_threshold(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            archive_threshold: default_archive_threshold(),
            retrieval_threshold: default_retrieval_threshold(),
            promotion_min_access: default_promotion_min_access(),
        }
    }
}

fn default_core_threshold() -> f32 {
    0.8
}

fn default_high_threshold() -> f32 {
    0.5
}

fn default_medium_threshold() -> f32 {
    0.3
}

fn default_archive_threshold() -> f32 {
    0.05
}

fn default_retrieval_threshold() -> f32 {
    0.2
}

fn default_promotion_min_access() -> u32 {
    3
}

/// Near-duplicate consolidation settings
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ConsolidationConfig {
    /// Cosine similarity at or above which two notes are duplicates (default: 0.85)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Working tier size above which a consolidation pass is due (default: 100).
    /// The all-pairs duplicate search is only affordable under this bound.
    #[serde(default = "default_max_working_notes")]
    pub max_working_notes: usize,
    /// Importance added to the surviving note of a merge (default: 0.05)
    #[serde(default = "default_recurrence_boost")]
    pub recurrence_boost: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_working_notes: default_max_working_notes(),
            recurrence_boost: default_recurrence_boost(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_max_working_notes() -> usize {
    100
}

fn default_recurrence_boost() -> f32 {
    0.05
}

/// Archive tier settings
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ArchiveConfig {
    /// Importance added to a note restored from the archive (default: 0.1)
    #[serde(default = "default_restore_boost")]
    pub restore_boost: f32,
    /// Records older than this many days are purged during maintenance.
    /// `None` disables purging.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Default result cap for archive searches (default: 20)
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            restore_boost: default_restore_boost(),
            retention_days: None,
            search_limit: default_search_limit(),
        }
    }
}

fn default_restore_boost() -> f32 {
    0.1
}

fn default_search_limit() -> usize {
    20
}
