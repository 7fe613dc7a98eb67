//! Snapshot System — Active-order snapshots with integrity and compression
//!
//! Features:
//! - Active orders serialized in `order_id` order, so equal books produce
//!   byte-identical snapshots
//! - SHA-256 integrity hash over the orders (the same digest as
//!   `OrderStore::state_hash`)
//! - Optional zstd compression
//! - Snapshot versioning for forward compatibility
//! - Atomic write (tmp file, fsync, rename)
//! - Cleanup policy (keep last N snapshots)

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::order::ActiveOrder;

use crate::book::{orders_digest, ActiveBook};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub version: u32,
    /// Last history journal sequence covered by this snapshot.
    pub sequence: u64,
    /// Active orders in `order_id` order.
    pub orders: Vec<ActiveOrder>,
    /// SHA-256 of the serialized orders.
    pub checksum: String,
    /// Whether the data on disk is zstd-compressed.
    pub compressed: bool,
}

impl BookSnapshot {
    /// Capture the book with a computed integrity hash.
    pub fn capture(sequence: u64, book: &ActiveBook, compressed: bool) -> Result<Self, SnapshotError> {
        let orders: Vec<ActiveOrder> = book.orders().cloned().collect();
        let checksum = Self::compute_hash(&orders)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            orders,
            checksum,
            compressed,
        })
    }

    pub fn compute_hash(orders: &[ActiveOrder]) -> Result<String, SnapshotError> {
        orders_digest(orders).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    pub fn verify_integrity(&self) -> Result<(), SnapshotError> {
        let actual = Self::compute_hash(&self.orders)?;
        if actual != self.checksum {
            return Err(SnapshotError::IntegrityFailure {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Rebuild the book this snapshot captured.
    pub fn into_book(self) -> ActiveBook {
        ActiveBook::from_orders(self.orders)
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    /// `compress` enables zstd compression.
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    /// Write a snapshot atomically: serialize, compress, write tmp, rename.
    pub fn write(&self, snapshot: &BookSnapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data = bincode::serialize(snapshot)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        // A snapshot with the same sequence in the other encoding is stale.
        let other = if self.compress {
            self.dir.join(format!("snapshot-{:012}.snap", snapshot.sequence))
        } else {
            self.dir.join(format!("snapshot-{:012}.snap.zst", snapshot.sequence))
        };
        if other.exists() {
            fs::remove_file(other)?;
        }

        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

/// Loads snapshots from disk, verifying integrity.
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, path: &Path) -> Result<BookSnapshot, SnapshotError> {
        let data = fs::read(path)?;

        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);
        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: BookSnapshot = bincode::deserialize(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        snapshot.verify_integrity()?;

        Ok(snapshot)
    }

    /// Load the snapshot with the highest sequence number.
    pub fn load_latest(&self) -> Result<BookSnapshot, SnapshotError> {
        let path = self.find_latest()?;
        self.load(&path)
    }

    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .into_iter()
            .next_back()
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// All snapshots as (sequence, path) pairs, ascending by sequence.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_sequence(&name) {
                results.push((seq, entry.path()));
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    /// Remove every snapshot (and any leftover tmp file).
    pub fn remove_all(&self) -> Result<usize, SnapshotError> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("snapshot-") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        let stem = filename.strip_prefix("snapshot-")?;
        let digits = stem
            .strip_suffix(".snap.zst")
            .or_else(|| stem.strip_suffix(".snap"))?;
        digits.parse::<u64>().ok()
    }
}

// ── Snapshot Cleanup Policy ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    /// Maximum number of snapshots to retain (at least one is always kept).
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    /// Remove old snapshots, keeping only the most recent `max_snapshots`.
    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;
        let keep = self.max_snapshots.max(1);

        let mut removed = Vec::new();
        if snapshots.len() > keep {
            let to_remove = snapshots.len() - keep;
            for (_, path) in snapshots.iter().take(to_remove) {
                fs::remove_file(path)?;
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::ids::{OrderId, Symbol};
    use types::numeric::Price;
    use types::order::Side;

    fn sample_book() -> ActiveBook {
        let mut book = ActiveBook::new();
        for id in [105u64, 100, 104] {
            book.insert_if_absent(ActiveOrder::new(
                OrderId::new(id),
                Symbol::new("SiH1"),
                if id % 2 == 0 { Side::Buy } else { Side::Sell },
                "75951.50".parse().unwrap(),
                10,
                id as i64,
            ));
        }
        book.reduce_or_remove(OrderId::new(104), 3);
        book
    }

    #[test]
    fn test_capture_orders_sorted_and_hash_matches_state_hash() {
        let book = sample_book();
        let snapshot = BookSnapshot::capture(7, &book, false).unwrap();
        let ids: Vec<u64> = snapshot.orders.iter().map(|o| o.order_id.value()).collect();
        assert_eq!(ids, vec![100, 104, 105]);
        assert_eq!(snapshot.checksum, book.state_hash().unwrap());
        assert!(snapshot.verify_integrity().is_ok());
    }

    #[test]
    fn test_write_and_load_roundtrip() {
        for compress in [false, true] {
            let tmp = TempDir::new().unwrap();
            let book = sample_book();
            let snapshot = BookSnapshot::capture(3, &book, compress).unwrap();

            let path = SnapshotWriter::new(tmp.path(), compress).write(&snapshot).unwrap();
            let expected_name = if compress {
                "snapshot-000000000003.snap.zst"
            } else {
                "snapshot-000000000003.snap"
            };
            assert_eq!(path.file_name().unwrap().to_string_lossy(), expected_name);

            let loaded = SnapshotLoader::new(tmp.path()).load(&path).unwrap();
            assert_eq!(loaded, snapshot);

            let restored = loaded.into_book();
            assert_eq!(restored.get(OrderId::new(104)).unwrap().remaining_volume, 7);
            assert_eq!(
                restored.get(OrderId::new(100)).unwrap().price,
                Price::from(rust_decimal::Decimal::new(7595150, 2))
            );
        }
    }

    #[test]
    fn test_integrity_failure_detected() {
        let tmp = TempDir::new().unwrap();
        let mut snapshot = BookSnapshot::capture(1, &sample_book(), false).unwrap();
        snapshot.orders[0].remaining_volume = 1;
        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();

        let err = SnapshotLoader::new(tmp.path()).load(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let tmp = TempDir::new().unwrap();
        let mut snapshot = BookSnapshot::capture(1, &sample_book(), false).unwrap();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();

        let err = SnapshotLoader::new(tmp.path()).load(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_load_latest_and_missing() {
        let tmp = TempDir::new().unwrap();
        let loader = SnapshotLoader::new(tmp.path());
        assert!(matches!(loader.load_latest(), Err(SnapshotError::NoSnapshots)));

        let writer = SnapshotWriter::new(tmp.path(), false);
        let book = sample_book();
        for seq in [2, 10, 5] {
            writer.write(&BookSnapshot::capture(seq, &book, false).unwrap()).unwrap();
        }
        assert_eq!(loader.load_latest().unwrap().sequence, 10);
    }

    #[test]
    fn test_rewrite_with_other_encoding_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let book = sample_book();
        SnapshotWriter::new(tmp.path(), false)
            .write(&BookSnapshot::capture(4, &book, false).unwrap())
            .unwrap();
        SnapshotWriter::new(tmp.path(), true)
            .write(&BookSnapshot::capture(4, &book, true).unwrap())
            .unwrap();

        let listed = SnapshotLoader::new(tmp.path()).list_snapshots().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].1.to_string_lossy().ends_with(".snap.zst"));
    }

    #[test]
    fn test_cleanup_keeps_latest() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), false);
        let book = sample_book();
        for seq in 1..=5 {
            writer.write(&BookSnapshot::capture(seq, &book, false).unwrap()).unwrap();
        }

        let removed = SnapshotCleanupPolicy::new(2).cleanup(tmp.path()).unwrap();
        assert_eq!(removed.len(), 3);
        let remaining: Vec<u64> = SnapshotLoader::new(tmp.path())
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(remaining, vec![4, 5]);

        SnapshotCleanupPolicy::new(0).cleanup(tmp.path()).unwrap();
        assert_eq!(SnapshotLoader::new(tmp.path()).list_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_all() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), true);
        writer
            .write(&BookSnapshot::capture(1, &sample_book(), true).unwrap())
            .unwrap();
        assert_eq!(SnapshotLoader::new(tmp.path()).remove_all().unwrap(), 1);
        assert!(SnapshotLoader::new(tmp.path()).list_snapshots().unwrap().is_empty());
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(SnapshotLoader::parse_sequence("snapshot-000000000042.snap"), Some(42));
        assert_eq!(SnapshotLoader::parse_sequence("snapshot-000000000042.snap.zst"), Some(42));
        assert_eq!(SnapshotLoader::parse_sequence("snapshot-000000000042.snap.tmp"), None);
        assert_eq!(SnapshotLoader::parse_sequence("journal-000001.bin"), None);
    }
}
