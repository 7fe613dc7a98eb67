//! Journal Reader — Sequential reader with corruption detection
//!
//! Features:
//! - Sequential entry reading across rotated journal files
//! - CRC32C checksum validation on every read
//! - Torn-tail detection with per-file byte offsets, so the store can cut
//!   an interrupted write off before appending again
//! - Gapless sequence validation
//! - Decoding entries back into history records in append order

use crate::journal::{JournalEntry, JournalError, JournalWriter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use types::event::HistoryRecord;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checksum mismatch in {file} at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch {
        file: String,
        offset: u64,
        sequence: u64,
    },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

// ── Corruption Log Entry ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    pub file: PathBuf,
    /// Offset within `file` where the unreadable bytes start.
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`. A missing directory
    /// reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = JournalWriter::list_files(dir)?;
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Read the next valid entry, validating its checksum.
    ///
    /// Returns `None` when all entries have been read. An unparseable tail
    /// ends the current file and is recorded in the corruption log.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }

            let offset = self.pos as u64;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    self.pos += consumed;

                    if !entry.verify_checksum() {
                        let file = self.current_file();
                        self.corruption_log.push(CorruptionRecord {
                            file: file.clone(),
                            byte_offset: offset,
                            kind: CorruptionKind::ChecksumMismatch,
                            detail: format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        });
                        return Err(ReaderError::ChecksumMismatch {
                            file: file.display().to_string(),
                            offset,
                            sequence: entry.sequence,
                        });
                    }

                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(e) => {
                    let remaining = self.data.len() - self.pos;
                    let file = self.current_file();
                    warn!(
                        file = %file.display(),
                        offset,
                        remaining,
                        error = %e,
                        "Torn journal tail, ignoring remainder of file"
                    );
                    self.corruption_log.push(CorruptionRecord {
                        file,
                        byte_offset: offset,
                        kind: CorruptionKind::TruncatedEntry,
                        detail: format!("{} trailing bytes cannot be parsed: {}", remaining, e),
                    });
                    self.pos = self.data.len();
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read all entries, requiring gapless sequences.
    pub fn read_all_validated(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let entries = self.read_all()?;
        Self::validate_sequences(&entries)?;
        Ok(entries)
    }

    /// Decode every batch into history records, in append order.
    pub fn read_history(&mut self) -> Result<Vec<HistoryRecord>, ReaderError> {
        let mut records = Vec::new();
        for entry in self.read_all_validated()? {
            records.extend(entry.records()?);
        }
        Ok(records)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    /// Check that entries have gapless, strictly increasing sequences.
    pub fn validate_sequences(entries: &[JournalEntry]) -> Result<(), ReaderError> {
        for window in entries.windows(2) {
            let expected = window[0].sequence + 1;
            if window[1].sequence != expected {
                return Err(ReaderError::SequenceGap {
                    expected,
                    got: window[1].sequence,
                });
            }
        }
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn current_file(&self) -> PathBuf {
        self.files
            .get(self.current_file_idx)
            .cloned()
            .unwrap_or_default()
    }

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data.clear();
        self.pos = 0;
        if let Some(path) = self.files.get(self.current_file_idx) {
            self.data = fs::read(path)?;
        }
        Ok(())
    }

    /// Move to the next file. Returns `false` once all files are exhausted.
    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        while self.current_file_idx + 1 < self.files.len() {
            self.current_file_idx += 1;
            self.load_current_file()?;
            if !self.data.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalConfig;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;
    use types::event::Action;
    use types::ids::{OrderId, Symbol};
    use types::numeric::Price;
    use types::order::Side;

    fn record(id: u64) -> HistoryRecord {
        HistoryRecord {
            symbol: Symbol::new("SiH1"),
            side: Side::Buy,
            timestamp: id as i64,
            order_id: OrderId::new(id),
            action: Action::Trade,
            price: Price::from_u64(75951),
            volume: id,
        }
    }

    fn write_batches(dir: &Path, batches: &[Vec<HistoryRecord>], max_file_size: u64) {
        let config = JournalConfig {
            max_file_size,
            ..JournalConfig::new(dir)
        };
        let mut writer = JournalWriter::open(config).unwrap();
        for batch in batches {
            writer.append_batch(batch).unwrap();
        }
        writer.sync().unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(&tmp.path().join("missing")).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.last_sequence().is_none());
    }

    #[test]
    fn test_read_history_in_append_order() {
        let tmp = TempDir::new().unwrap();
        let batches = vec![
            (1..=3).map(record).collect::<Vec<_>>(),
            (4..=4).map(record).collect(),
            (5..=9).map(record).collect(),
        ];
        write_batches(tmp.path(), &batches, 64 * 1024 * 1024);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let history = reader.read_history().unwrap();
        let ids: Vec<u64> = history.iter().map(|r| r.order_id.value()).collect();
        assert_eq!(ids, (1..=9).collect::<Vec<_>>());
        assert_eq!(reader.last_sequence(), Some(3));
    }

    #[test]
    fn test_read_across_rotated_files() {
        let tmp = TempDir::new().unwrap();
        let batches: Vec<Vec<HistoryRecord>> = (1..=6).map(|i| vec![record(i)]).collect();
        write_batches(tmp.path(), &batches, 50);
        assert!(JournalWriter::list_files(tmp.path()).unwrap().len() > 1);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all_validated().unwrap();
        assert_eq!(entries.len(), 6);

        let mut fresh = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(fresh.read_history().unwrap().len(), 6);
    }

    #[test]
    fn test_torn_tail_is_skipped_and_logged() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[vec![record(1)], vec![record(2)]], 64 * 1024 * 1024);

        let path = tmp.path().join("journal-000000.bin");
        let good_len = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0x00, 0x00, 0x00, 0x01, 0x02]).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 2);

        let log = reader.corruption_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, CorruptionKind::TruncatedEntry);
        assert_eq!(log[0].byte_offset, good_len);
        assert_eq!(log[0].file, path);
    }

    #[test]
    fn test_checksum_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_batches(tmp.path(), &[vec![record(1)]], 64 * 1024 * 1024);

        let path = tmp.path().join("journal-000000.bin");
        let mut bytes = fs::read(&path).unwrap();
        let last_payload_byte = bytes.len() - 5;
        bytes[last_payload_byte] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        match reader.next_entry() {
            Err(ReaderError::ChecksumMismatch { sequence, offset, .. }) => {
                assert_eq!(sequence, 1);
                assert_eq!(offset, 0);
            }
            other => panic!("Expected ChecksumMismatch, got {:?}", other.map(|e| e.is_some())),
        }
        assert_eq!(reader.corruption_log()[0].kind, CorruptionKind::ChecksumMismatch);
    }

    #[test]
    fn test_validate_sequences_detects_gap() {
        let entries = vec![
            JournalEntry::from_records(1, &[record(1)]).unwrap(),
            JournalEntry::from_records(3, &[record(2)]).unwrap(),
        ];
        match JournalReader::validate_sequences(&entries) {
            Err(ReaderError::SequenceGap { expected, got }) => {
                assert_eq!(expected, 2);
                assert_eq!(got, 3);
            }
            other => panic!("Expected SequenceGap, got {:?}", other),
        }
    }
}
