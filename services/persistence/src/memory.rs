//! In-process backend. Everything lives in memory and is lost on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;
use types::event::HistoryRecord;
use types::ids::{OrderId, Symbol};
use types::order::{ActiveOrder, Side};

use crate::book::{ActiveBook, LockedBook, SideSummary, TradeOutcome};
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    book: LockedBook,
    history: Mutex<Vec<HistoryRecord>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn history(&self) -> Result<std::sync::MutexGuard<'_, Vec<HistoryRecord>>, StoreError> {
        self.history
            .lock()
            .map_err(|_| StoreError::LockPoisoned("history"))
    }
}

impl OrderStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.book.write()?.clear();
        self.history()?.clear();
        debug!("Memory store cleared");
        Ok(())
    }

    fn insert_history_batch(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.history()?.extend_from_slice(records);
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
        self.ensure_open()?;
        Ok(self.history()?.clone())
    }

    fn state_hash(&self) -> Result<String, StoreError> {
        self.ensure_open()?;
        self.book.read()?.state_hash()
    }

    fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Memory store closed");
        }
        Ok(())
    }
}

impl From<ActiveBook> for MemoryStore {
    fn from(book: ActiveBook) -> Self {
        Self {
            book: LockedBook::new(book),
            ..Self::default()
        }
    }
}
