//! Journal Writer — Append-only history archive with checksums
//!
//! Every `insert_history_batch` call becomes exactly one journal entry, so a
//! batch is recorded whole or not at all. A write or fsync that fails is
//! truncated away before the error is returned, and the sequence does not
//! advance, so the caller may retry the same batch.
//!
//! # Binary Format (per entry)
//! ```text
//! [total_len:    u32]
//! [sequence:     u64]
//! [timestamp:    i64]   // latest feed timestamp in the batch
//! [record_count: u32]
//! [payload_len:  u32][payload: bytes]   // bincode Vec<HistoryRecord>
//! [checksum:     u32]   // CRC32C over sequence+timestamp+record_count+payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use types::event::HistoryRecord;

/// Bodies above this size are treated as corruption when reading.
pub const MAX_ENTRY_BODY: usize = 256 * 1024 * 1024;

const MIN_ENTRY_BODY: usize = 8 + 8 + 4 + 4 + 4;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} + {incoming} > {limit}")]
    SizeLimitExceeded {
        current: u64,
        incoming: u64,
        limit: u64,
    },

    #[error("Entry too large: {0} bytes")]
    EntryTooLarge(usize),
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One persisted history batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic batch sequence, starting at 1.
    pub sequence: u64,
    /// Latest feed timestamp among the batch's records, not wall clock.
    pub timestamp: i64,
    pub record_count: u32,
    /// Bincode-serialized `Vec<HistoryRecord>`.
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    /// Create a new entry, computing the CRC32C checksum automatically.
    pub fn new(sequence: u64, timestamp: i64, record_count: u32, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, record_count, &payload);
        Self {
            sequence,
            timestamp,
            record_count,
            payload,
            checksum,
        }
    }

    /// Encode a batch of records into an entry.
    pub fn from_records(sequence: u64, records: &[HistoryRecord]) -> Result<Self, JournalError> {
        let payload =
            bincode::serialize(records).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let timestamp = records.iter().map(|r| r.timestamp).max().unwrap_or(0);
        let record_count = u32::try_from(records.len())
            .map_err(|_| JournalError::EntryTooLarge(records.len()))?;
        Ok(Self::new(sequence, timestamp, record_count, payload))
    }

    /// Decode the batch carried by this entry.
    pub fn records(&self) -> Result<Vec<HistoryRecord>, JournalError> {
        let records: Vec<HistoryRecord> = bincode::deserialize(&self.payload)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        if records.len() != self.record_count as usize {
            return Err(JournalError::Serialization(format!(
                "entry {} declares {} records, payload holds {}",
                self.sequence,
                self.record_count,
                records.len()
            )));
        }
        Ok(records)
    }

    pub fn compute_checksum(
        sequence: u64,
        timestamp: i64,
        record_count: u32,
        payload: &[u8],
    ) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&record_count.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        let expected =
            Self::compute_checksum(self.sequence, self.timestamp, self.record_count, &self.payload);
        self.checksum == expected
    }

    /// Serialize entry to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let body_len = MIN_ENTRY_BODY + self.payload.len();
        if body_len > MAX_ENTRY_BODY {
            return Err(JournalError::EntryTooLarge(body_len));
        }

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.record_count.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        Ok(buf)
    }

    /// Deserialize entry from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)`. The checksum is read but not
    /// verified; callers decide how to treat a mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        if data.len() < 4 {
            return Err(JournalError::Serialization(
                "Not enough data for length prefix".into(),
            ));
        }

        let body_len = read_u32(data, 0) as usize;
        if body_len > MAX_ENTRY_BODY {
            return Err(JournalError::Serialization(format!(
                "Implausible body length: {} (likely corruption)",
                body_len
            )));
        }
        if body_len < MIN_ENTRY_BODY {
            return Err(JournalError::Serialization(format!(
                "Body too small: {} bytes, minimum is {}",
                body_len, MIN_ENTRY_BODY
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Serialization(format!(
                "Incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let sequence = read_u64(body, 0);
        let timestamp = read_u64(body, 8) as i64;
        let record_count = read_u32(body, 16);
        let payload_len = read_u32(body, 20) as usize;

        if 24 + payload_len + 4 != body.len() {
            return Err(JournalError::Serialization(format!(
                "payload_len {} does not match body length {}",
                payload_len,
                body.len()
            )));
        }
        let payload = body[24..24 + payload_len].to_vec();
        let checksum = read_u32(body, 24 + payload_len);

        let entry = Self {
            sequence,
            timestamp,
            record_count,
            payload,
            checksum,
        };
        Ok((entry, total))
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

// ── Fsync Policy ────────────────────────────────────────────────────

/// Controls when `fsync` (durable write) is called. Buffered data is always
/// flushed to the OS at the end of each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync after every batch.
    EveryWrite,
    /// Fsync every N batches.
    EveryN(usize),
    /// Fsync only on rotation and close.
    OnClose,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::EveryWrite
    }
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation (default 64 MiB).
    pub max_file_size: u64,
    /// Maximum total journal size in bytes (0 = unlimited).
    pub max_total_size: u64,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with checksums, rotation and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
    #[cfg(test)]
    fail_next_fsync: bool,
}

impl JournalWriter {
    /// Open the journal, creating the directory if needed. Appends continue
    /// in the highest-numbered existing file.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::find_latest_index(&config.dir);
        let current_file = Self::journal_path(&config.dir, file_index);
        let file = Self::open_file(&current_file)?;

        let current_file_size = file.metadata()?.len();
        let total_size = Self::compute_total_size(&config.dir)?;

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 1,
            writes_since_fsync: 0,
            file_index,
            total_size,
            #[cfg(test)]
            fail_next_fsync: false,
        })
    }

    /// Set the next expected sequence number (used after reading back an
    /// existing journal).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Append one batch of records as a single entry. An empty batch writes
    /// nothing and returns `None`.
    pub fn append_batch(
        &mut self,
        records: &[HistoryRecord],
    ) -> Result<Option<JournalEntry>, JournalError> {
        if records.is_empty() {
            return Ok(None);
        }
        let entry = JournalEntry::from_records(self.next_sequence, records)?;
        self.append(&entry)?;
        Ok(Some(entry))
    }

    /// Append a prepared entry. Validates sequence monotonicity.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        let bytes = entry.to_bytes()?;
        let incoming = bytes.len() as u64;

        if self.config.max_total_size > 0
            && self.total_size + incoming > self.config.max_total_size
        {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                incoming,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size > 0 && self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        // Nothing below is committed until the entry is written and, when the
        // policy asks for it, synced.
        let start = self.current_file_size;
        let unsynced = self.writes_since_fsync + 1;
        let synced = match self
            .write_entry(&bytes)
            .and_then(|()| self.apply_fsync_policy(unsynced))
        {
            Ok(synced) => synced,
            Err(e) => {
                warn!(
                    sequence = entry.sequence,
                    file = %self.current_file_path().display(),
                    error = %e,
                    "Journal append failed, truncating entry"
                );
                self.truncate_to(start)?;
                return Err(e);
            }
        };

        self.current_file_size += incoming;
        self.total_size += incoming;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_fsync = if synced { 0 } else { unsynced };

        debug!(
            sequence = entry.sequence,
            records = entry.record_count,
            bytes = incoming,
            "Journal entry appended"
        );
        Ok(())
    }

    /// Force flush + fsync (used before shutdown / rotation).
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.sync_file()?;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Delete every journal file and start over at `journal-000000.bin`
    /// with sequence 1.
    pub fn purge(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        for path in Self::list_files(&self.config.dir)? {
            fs::remove_file(&path)?;
        }

        self.file_index = 0;
        self.current_file = Self::journal_path(&self.config.dir, 0);
        let file = Self::open_file(&self.current_file)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();

        self.current_file_size = 0;
        self.total_size = 0;
        self.next_sequence = 1;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Journal files in `dir`, oldest first.
    pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, JournalError> {
        let mut indexed: Vec<(u64, PathBuf)> = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(index) = Self::parse_index(&name) {
                    indexed.push((index, entry.path()));
                }
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, path)| path).collect())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn write_entry(&mut self, data: &[u8]) -> Result<(), JournalError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Drop whatever is still buffered and cut the file back to `len`.
    fn truncate_to(&mut self, len: u64) -> Result<(), JournalError> {
        let file = Self::open_file(&self.current_file)?;
        file.set_len(len)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.current_file_size = len;
        Ok(())
    }

    /// Fsync if `unsynced` writes are due under the policy. Returns whether
    /// it did.
    fn apply_fsync_policy(&mut self, unsynced: usize) -> Result<bool, JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => unsynced >= n.max(1),
            FsyncPolicy::OnClose => false,
        };
        if should_fsync {
            self.sync_file()?;
        }
        Ok(should_fsync)
    }

    fn sync_file(&mut self) -> Result<(), JournalError> {
        if let Some(e) = self.injected_fsync_failure() {
            return Err(e.into());
        }
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    #[cfg(test)]
    fn injected_fsync_failure(&mut self) -> Option<io::Error> {
        std::mem::take(&mut self.fail_next_fsync)
            .then(|| io::Error::new(io::ErrorKind::Other, "injected fsync failure"))
    }

    #[cfg(not(test))]
    fn injected_fsync_failure(&mut self) -> Option<io::Error> {
        None
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = Self::journal_path(&self.config.dir, self.file_index);
        let file = Self::open_file(&self.current_file)?;

        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        debug!(file = %self.current_file.display(), "Journal rotated");
        Ok(())
    }

    fn open_file(path: &Path) -> Result<File, JournalError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("journal-{:06}.bin", index))
    }

    fn parse_index(name: &str) -> Option<u64> {
        name.strip_prefix("journal-")?
            .strip_suffix(".bin")?
            .parse::<u64>()
            .ok()
    }

    fn find_latest_index(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| Self::parse_index(&e.file_name().to_string_lossy()))
                    .max()
            })
            .unwrap_or(0)
    }

    fn compute_total_size(dir: &Path) -> Result<u64, JournalError> {
        let mut total = 0u64;
        for path in Self::list_files(dir)? {
            total += fs::metadata(&path)?.len();
        }
        Ok(total)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
