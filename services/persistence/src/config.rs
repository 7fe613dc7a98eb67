//! Backend selection

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::journal::{FsyncPolicy, JournalConfig};

/// Which store backs a run. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory,
    File(FileStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Root directory; the journal and snapshots live in subdirectories.
    pub dir: PathBuf,
    /// Journal file size that triggers rotation.
    pub max_file_size: u64,
    /// Total journal size limit (0 = unlimited).
    pub max_total_size: u64,
    pub fsync: FsyncPolicy,
    pub compress_snapshots: bool,
    pub snapshots_to_keep: usize,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            fsync: FsyncPolicy::EveryWrite,
            compress_snapshots: true,
            snapshots_to_keep: 3,
        }
    }
}

impl FileStoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.dir.join("journal")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            max_file_size: self.max_file_size,
            max_total_size: self.max_total_size,
            fsync_policy: self.fsync,
            ..JournalConfig::new(self.journal_dir())
        }
    }
}
