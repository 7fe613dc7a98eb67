//! Store contract — the persistence collaborator consumed by ingestion
//!
//! One trait, two backends (`MemoryStore`, `FileStore`) with identical
//! semantics. Mutations are atomic per call: a concurrent reader sees an
//! order either fully present with consistent volumes or fully absent.

use std::io;
use thiserror::Error;
use types::event::HistoryRecord;
use types::ids::{OrderId, Symbol};
use types::order::{ActiveOrder, Side};

use crate::book::SideSummary;
use crate::journal::JournalError;
use crate::reader::ReaderError;
use crate::snapshot::SnapshotError;

pub use crate::book::TradeOutcome;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Journal read error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Store is closed")]
    Closed,

    #[error("Storage failure: {0}")]
    Failure(String),
}

// ── Contract ────────────────────────────────────────────────────────

/// Physical backing for the active-order set and the history archive.
///
/// All methods take `&self`; implementations synchronize internally so a
/// store can be queried while another thread ingests into it.
pub trait OrderStore: Send + Sync {
    /// Short backend name for diagnostics (`"memory"`, `"file"`).
    fn backend(&self) -> &'static str;

    /// Wipe active orders and history.
    fn clear(&self) -> Result<(), StoreError>;

    /// Append a batch of history records. All-or-nothing per call.
    fn insert_history_batch(&self, records: &[HistoryRecord]) -> Result<(), StoreError>;

    /// Insert unless `order_id` is already active. Returns whether it was
    /// inserted; an existing order is left untouched.
    fn upsert_active_order_if_absent(&self, order: ActiveOrder) -> Result<bool, StoreError>;

    /// Reduce the remaining volume, removing the order once it reaches zero.
    fn reduce_or_remove_active_order(
        &self,
        order_id: OrderId,
        volume: u64,
    ) -> Result<TradeOutcome, StoreError>;

    /// Remove an order. Absent ids are a no-op and return `None`.
    fn delete_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError>;

    fn get_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError>;

    fn count_active_orders(&self) -> Result<usize, StoreError>;

    /// Up to `limit` orders, newest first, ties by ascending id.
    fn sample_active_orders(&self, limit: usize) -> Result<Vec<ActiveOrder>, StoreError>;

    fn summarize_active_orders(&self) -> Result<Vec<SideSummary>, StoreError>;

    /// Best standing order for one side of `symbol` created at or before
    /// `as_of`.
    fn query_best_price(
        &self,
        symbol: &Symbol,
        side: Side,
        as_of: i64,
    ) -> Result<Option<ActiveOrder>, StoreError>;

    /// Every archived record, in append order.
    fn load_history(&self) -> Result<Vec<HistoryRecord>, StoreError>;

    /// SHA-256 over the active orders in `order_id` order.
    fn state_hash(&self) -> Result<String, StoreError>;

    /// Release underlying handles. Later calls fail with `StoreError::Closed`;
    /// closing twice is a no-op.
    fn close(&self) -> Result<(), StoreError>;
}

impl<S: OrderStore + ?Sized> OrderStore for Box<S> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }

    fn insert_history_batch(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        (**self).insert_history_batch(records)
    }

    fn upsert_active_order_if_absent(&self, order: ActiveOrder) -> Result<bool, StoreError> {
        (**self).upsert_active_order_if_absent(order)
    }

    fn reduce_or_remove_active_order(
        &self,
        order_id: OrderId,
        volume: u64,
    ) -> Result<TradeOutcome, StoreError> {
        (**self).reduce_or_remove_active_order(order_id, volume)
    }

    fn delete_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError> {
        (**self).delete_active_order(order_id)
    }

    fn get_active_order(&self, order_id: OrderId) -> Result<Option<ActiveOrder>, StoreError> {
        (**self).get_active_order(order_id)
    }

    fn count_active_orders(&self) -> Result<usize, StoreError> {
        (**self).count_active_orders()
    }

    fn sample_active_orders(&self, limit: usize) -> Result<Vec<ActiveOrder>, StoreError> {
        (**self).sample_active_orders(limit)
    }

    fn summarize_active_orders(&self) -> Result<Vec<SideSummary>, StoreError> {
        (**self).summarize_active_orders()
    }

    fn query_best_price(
        &self,
        symbol: &Symbol,
        side: Side,
        as_of: i64,
    ) -> Result<Option<ActiveOrder>, StoreError> {
        (**self).query_best_price(symbol, side, as_of)
    }

    fn load_history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        (**self).load_history()
    }

    fn state_hash(&self) -> Result<String, StoreError> {
        (**self).state_hash()
    }

    fn close(&self) -> Result<(), StoreError> {
        (**self).close()
    }
}
