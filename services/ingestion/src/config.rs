//! Run configuration
//!
//! Loaded from a TOML file by the `tick-ingest` binary. Every section has
//! defaults, so an empty file is a valid (memory-backed) configuration.

use persistence::StoreConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::source::LayoutChoice;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub report: ReportConfig,
}

impl AppConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingest.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// CSV feed to ingest.
    pub path: PathBuf,
    pub layout: LayoutChoice,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("resources/feed.csv"),
            layout: LayoutChoice::Auto,
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// History records per bulk write.
    pub batch_size: usize,
    /// Stop after this many events.
    pub limit: Option<u64>,
    /// Extra attempts for a failed history flush. 0 means the first failure
    /// is fatal.
    pub flush_retries: u32,
    /// Pause between flush attempts.
    pub retry_backoff_ms: u64,
    /// Flush each full batch on a background thread while the next batch
    /// is applied.
    pub pipelined_flush: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            limit: None,
            flush_retries: 0,
            retry_backoff_ms: 0,
            pipelined_flush: false,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "ingest.batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// What the binary logs after a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub sample_size: usize,
    /// Symbols to print best prices for.
    pub symbols: Vec<String>,
    /// Best-price cutoff; unbounded when absent.
    pub as_of: Option<i64>,
    /// Replay the archive into a scratch store and compare active sets.
    pub verify_replay: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sample_size: 5,
            symbols: Vec::new(),
            as_of: None,
            verify_replay: false,
        }
    }
}
