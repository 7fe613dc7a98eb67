//! Embedded file backend
//!
//! History goes to the checksummed journal, one entry per batch. Active
//! orders are kept in memory and written as a snapshot on `checkpoint` and
//! `close`. `open` restores the latest snapshot and replays the journal
//! entries written after it, so a process that died without closing still
//! comes back with the active set its history implies.
//!
//! Lock order is journal, then book.

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use types::event::HistoryRecord;
use types::ids::{OrderId, Symbol};
use types::order::{ActiveOrder, Side};

use crate::book::{ActiveBook, LockedBook, SideSummary, TradeOutcome};
use crate::config::FileStoreConfig;
use crate::journal::JournalWriter;
use crate::reader::{CorruptionKind, JournalReader};
use crate::snapshot::{
    BookSnapshot, SnapshotCleanupPolicy, SnapshotError, SnapshotLoader, SnapshotWriter,
};
use crate::store::{OrderStore, StoreError};

pub struct FileStore {
    config: FileStoreConfig,
    book: LockedBook,
    /// `None` once closed.
    journal: Mutex<Option<JournalWriter>>,
    closed: AtomicBool,
}

impl FileStore {
    /// Open (or create) a store rooted at `config.dir`.
    pub fn open(config: FileStoreConfig) -> Result<Self, StoreError> {
        let journal_dir = config.journal_dir();
        std::fs::create_dir_all(&journal_dir)?;
        std::fs::create_dir_all(config.snapshot_dir())?;

        let mut reader = JournalReader::open(&journal_dir)?;
        let entries = reader.read_all_validated()?;
        for record in reader.corruption_log() {
            if record.kind == CorruptionKind::TruncatedEntry {
                warn!(
                    file = %record.file.display(),
                    offset = record.byte_offset,
                    "Truncating torn journal tail"
                );
                let file = OpenOptions::new().write(true).open(&record.file)?;
                file.set_len(record.byte_offset)?;
            }
        }
        let last_sequence = reader.last_sequence().unwrap_or(0);

        let loader = SnapshotLoader::new(config.snapshot_dir());
        let (mut book, base_sequence) = match loader.load_latest() {
            Ok(snapshot) => {
                if snapshot.sequence > last_sequence {
                    warn!(
                        snapshot_sequence = snapshot.sequence,
                        journal_sequence = last_sequence,
                        "Snapshot is ahead of the journal"
                    );
                }
                let sequence = snapshot.sequence;
                (snapshot.into_book(), sequence)
            }
            Err(SnapshotError::NoSnapshots) => (ActiveBook::new(), 0),
            Err(e) => return Err(e.into()),
        };

        // Batches journaled after the snapshot were never checkpointed.
        let mut replayed = 0usize;
        for entry in entries.iter().filter(|e| e.sequence > base_sequence) {
            for record in entry.records()? {
                book.apply_record(&record);
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!(
                snapshot_sequence = base_sequence,
                journal_sequence = last_sequence,
                records = replayed,
                "Replayed journal past snapshot"
            );
        }

        let mut writer = JournalWriter::open(config.journal_config())?;
        writer.set_next_sequence(last_sequence + 1);

        info!(
            dir = %config.dir.display(),
            journal_entries = entries.len(),
            active_orders = book.len(),
            "File store opened"
        );

        Ok(Self {
            config,
            book: LockedBook::new(book),
            journal: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    /// Sync the journal and write a snapshot of the active orders.
    ///
    /// The snapshot is tagged with the last journaled sequence, so call this
    /// at a batch boundary, after the batch's history has been appended.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut guard = self.journal()?;
        let writer = guard.as_mut().ok_or(StoreError::Closed)?;
        self.checkpoint_with(writer)
    }

    fn checkpoint_with(&self, writer: &mut JournalWriter) -> Result<(), StoreError> {
        writer.sync()?;
        let sequence = writer.next_sequence().saturating_sub(1);

        let snapshot = {
            let book = self.book.read()?;
            BookSnapshot::capture(sequence, &book, self.config.compress_snapshots)?
        };
        let path = SnapshotWriter::new(self.config.snapshot_dir(), self.config.compress_snapshots)
            .write(&snapshot)?;
        let removed = SnapshotCleanupPolicy::new(self.config.snapshots_to_keep)
            .cleanup(&self.config.snapshot_dir())?;

        debug!(
            path = %path.display(),
            sequence,
            orders = snapshot.orders.len(),
            removed = removed.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn journal(&self) -> Result<MutexGuard<'_, Option<JournalWriter>>, StoreError> {
        self.journal
            .lock()
            .map_err(|_| StoreError::LockPoisoned("journal"))
    }
}

impl OrderStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.journal()?;
        let writer = guard.as_mut().ok_or(StoreError::Closed)?;

        writer.purge()?;
        SnapshotLoader::new(self.config.snapshot_dir()).remove_all()?;
        self.book.write()?.clear();

        info!(dir = %self.config.dir.display(), "File store cleared");
        Ok(())
    }

    fn insert_history_batch(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        let mut guard = self.journal()?;
        let writer = guard.as_mut().ok_or(StoreError::Closed)?;
        writer.append_batch(records)?;
        Ok(())
    }

    fn upsert_active_order_if_absent(&self, order: ActiveOrder) -> Result<bool, StoreError> {
        self.ensure_open()?;
        Ok(self.book.write()?.insert_if_absent(order))
    }

    fn reduce_or_remove_active_order(
        &self,
        order_id: OrderId,
        volume: u64,
    ) -> Result<TradeOutcome, StoreError> {
        self.ensure_open()?;
        Ok(self.book.write()?.reduce_or_remove(order_id, volume))
    }

    fn delete_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError> {
        self.ensure_open()?;
        Ok(self.book.write()?.remove(order_id))
    }

    fn get_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError> {
        self.ensure_open()?;
        Ok(self.book.read()?.get(order_id).cloned())
    }

    fn count_active_orders(&self) -> Result<usize, StoreError> {
        self.ensure_open()?;
        Ok(self.book.read()?.len())
    }

    fn sample_active_orders(&self, limit: usize) -> Result<Vec<ActiveOrder>, StoreError> {
        self.ensure_open()?;
        Ok(self.book.read()?.sample(limit))
    }

    fn summarize_active_orders(&self) -> Result<Vec<SideSummary>, StoreError> {
        self.ensure_open()?;
        Ok(self.book.read()?.summary())
    }

    fn query_best_price(
        &self,
        symbol: &Symbol,
        side: Side,
        as_of: i64,
    ) -> Result<Option<ActiveOrder>, StoreError> {
        self.ensure_open()?;
        Ok(self.book.read()?.best_price(symbol, side, as_of).cloned())
    }

    fn load_history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        // Holding the journal lock keeps appends out while the files are read.
        let guard = self.journal()?;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        let mut reader = JournalReader::open(&self.config.journal_dir())?;
        Ok(reader.read_history()?)
    }

    fn state_hash(&self) -> Result<String, StoreError> {
        self.ensure_open()?;
        self.book.read()?.state_hash()
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.journal()?;
        let Some(mut writer) = guard.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);

        self.checkpoint_with(&mut writer)?;
        info!(
            dir = %self.config.dir.display(),
            journal_bytes = writer.total_size(),
            "File store closed"
        );
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(dir = %self.config.dir.display(), error = %e, "Failed to close file store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::FsyncPolicy;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use types::event::Action;
    use types::numeric::Price;

    fn order(id: u64, side: Side, price: &str, volume: u64, ts: i64) -> ActiveOrder {
        ActiveOrder::new(
            OrderId::new(id),
            Symbol::new("RIH1"),
            side,
            price.parse().unwrap(),
            volume,
            ts,
        )
    }

    fn record(id: u64, action: Action) -> HistoryRecord {
        HistoryRecord {
            symbol: Symbol::new("RIH1"),
            side: Side::Buy,
            timestamp: id as i64,
            order_id: OrderId::new(id),
            action,
            price: Price::from_u64(137105),
            volume: 10,
        }
    }

    #[test]
    fn test_open_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        assert_eq!(store.backend(), "file");
        assert_eq!(store.count_active_orders().unwrap(), 0);
        assert!(store.load_history().unwrap().is_empty());
        assert!(tmp.path().join("journal").is_dir());
        assert!(tmp.path().join("snapshots").is_dir());
    }

    #[test]
    fn test_history_batches_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();

        store
            .insert_history_batch(&[record(1, Action::New), record(2, Action::Trade)])
            .unwrap();
        store.insert_history_batch(&[]).unwrap();
        store.insert_history_batch(&[record(3, Action::Cancel)]).unwrap();

        let history = store.load_history().unwrap();
        let actions: Vec<Action> = history.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![Action::New, Action::Trade, Action::Cancel]);
    }

    #[test]
    fn test_reopen_restores_orders_and_history() {
        let tmp = TempDir::new().unwrap();
        let hash = {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            store.upsert_active_order_if_absent(order(104, Side::Buy, "137105", 10, 1)).unwrap();
            store.upsert_active_order_if_absent(order(105, Side::Sell, "92186.50", 3, 2)).unwrap();
            store.reduce_or_remove_active_order(OrderId::new(104), 4).unwrap();
            store.insert_history_batch(&[record(104, Action::New)]).unwrap();
            let hash = store.state_hash().unwrap();
            store.close().unwrap();
            hash
        };

        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        assert_eq!(store.state_hash().unwrap(), hash);
        assert_eq!(
            store.get_active_order(OrderId::new(104)).unwrap().unwrap().remaining_volume,
            6
        );
        let ask = store
            .query_best_price(&Symbol::new("RIH1"), Side::Sell, i64::MAX)
            .unwrap()
            .unwrap();
        assert_eq!(ask.price.to_string(), "92186.50");
        assert_eq!(store.load_history().unwrap().len(), 1);

        store.insert_history_batch(&[record(105, Action::New)]).unwrap();
        assert_eq!(store.load_history().unwrap().len(), 2);
    }

    #[test]
    fn test_drop_closes_and_snapshots() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            store.upsert_active_order_if_absent(order(1, Side::Buy, "100", 1, 1)).unwrap();
        }
        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        assert_eq!(store.count_active_orders().unwrap(), 1);
    }

    #[test]
    fn test_reopen_after_crash_replays_journal_past_snapshot() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            store.upsert_active_order_if_absent(order(1, Side::Buy, "137105", 10, 1)).unwrap();
            store.insert_history_batch(&[record(1, Action::New)]).unwrap();
            store.checkpoint().unwrap();

            store.upsert_active_order_if_absent(order(2, Side::Buy, "137105", 10, 2)).unwrap();
            store.insert_history_batch(&[record(2, Action::New)]).unwrap();
            // No close and no Drop: the process dies here.
            std::mem::forget(store);
        }

        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        assert_eq!(store.load_history().unwrap().len(), 2);
        assert_eq!(store.count_active_orders().unwrap(), 2);
        assert!(store.get_active_order(OrderId::new(2)).unwrap().is_some());
    }

    #[test]
    fn test_replay_applies_trades_and_cancels() {
        let tmp = TempDir::new().unwrap();
        let hash = {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            for id in [1, 2, 3] {
                store.upsert_active_order_if_absent(order(id, Side::Buy, "137105", 10, id as i64)).unwrap();
            }
            store
                .insert_history_batch(&[record(1, Action::New), record(2, Action::New), record(3, Action::New)])
                .unwrap();
            store.checkpoint().unwrap();

            store.reduce_or_remove_active_order(OrderId::new(1), 10).unwrap();
            store.delete_active_order(OrderId::new(2)).unwrap();
            store.insert_history_batch(&[record(1, Action::Trade), record(2, Action::Cancel)]).unwrap();
            let hash = store.state_hash().unwrap();
            std::mem::forget(store);
            hash
        };

        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        assert_eq!(store.state_hash().unwrap(), hash);
        assert_eq!(store.count_active_orders().unwrap(), 1);
        assert!(store.get_active_order(OrderId::new(3)).unwrap().is_some());
    }

    #[test]
    fn test_reopen_without_snapshot_replays_whole_journal() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            store.upsert_active_order_if_absent(order(7, Side::Buy, "137105", 10, 7)).unwrap();
            store.insert_history_batch(&[record(7, Action::New)]).unwrap();
            std::mem::forget(store);
        }
        assert!(SnapshotLoader::new(tmp.path().join("snapshots"))
            .list_snapshots()
            .unwrap()
            .is_empty());

        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        let restored = store.get_active_order(OrderId::new(7)).unwrap().unwrap();
        assert_eq!(restored.remaining_volume, 10);
        assert_eq!(restored.price, Price::from_u64(137105));
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        store.upsert_active_order_if_absent(order(1, Side::Buy, "100", 1, 1)).unwrap();
        store.insert_history_batch(&[record(1, Action::New)]).unwrap();
        store.checkpoint().unwrap();

        store.clear().unwrap();
        assert_eq!(store.count_active_orders().unwrap(), 0);
        assert!(store.load_history().unwrap().is_empty());
        assert!(SnapshotLoader::new(tmp.path().join("snapshots"))
            .list_snapshots()
            .unwrap()
            .is_empty());

        store.insert_history_batch(&[record(2, Action::New)]).unwrap();
        assert_eq!(store.load_history().unwrap().len(), 1);
    }

    #[test]
    fn test_operations_after_close() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(matches!(store.count_active_orders(), Err(StoreError::Closed)));
        assert!(matches!(
            store.insert_history_batch(&[record(1, Action::New)]),
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.load_history(), Err(StoreError::Closed)));
        assert!(matches!(store.clear(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_size_limit_surfaces_as_storage_failure() {
        let tmp = TempDir::new().unwrap();
        let config = FileStoreConfig {
            max_total_size: 64,
            fsync: FsyncPolicy::OnClose,
            ..FileStoreConfig::new(tmp.path())
        };
        let store = FileStore::open(config).unwrap();

        let batch: Vec<HistoryRecord> = (1..=5).map(|id| record(id, Action::New)).collect();
        let err = store.insert_history_batch(&batch).unwrap_err();
        assert!(matches!(err, StoreError::Journal(_)));
        assert!(store.load_history().unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_repaired_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
            store.insert_history_batch(&[record(1, Action::New)]).unwrap();
        }

        let journal = tmp.path().join("journal").join("journal-000000.bin");
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(&[0xFF, 0x00, 0x00]).unwrap();
        drop(file);

        let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
        store.insert_history_batch(&[record(2, Action::Trade)]).unwrap();

        let history = store.load_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, Action::Trade);
        assert!(fs::metadata(&journal).unwrap().len() > 0);
    }

    #[test]
    fn test_corrupt_snapshot_fails_open() {
        let tmp = TempDir::new().unwrap();
        {
            let config = FileStoreConfig {
                compress_snapshots: false,
                ..FileStoreConfig::new(tmp.path())
            };
            let store = FileStore::open(config).unwrap();
            store.upsert_active_order_if_absent(order(1, Side::Buy, "100", 5, 1)).unwrap();
        }

        let snapshots = SnapshotLoader::new(tmp.path().join("snapshots"))
            .list_snapshots()
            .unwrap();
        let path = &snapshots[0].1;
        let mut bytes = fs::read(path).unwrap();
        let len = bytes.len();
        bytes[len - 10] ^= 0x01;
        fs::write(path, bytes).unwrap();

        assert!(FileStore::open(FileStoreConfig::new(tmp.path())).is_err());
    }
}
