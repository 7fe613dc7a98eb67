//! Active order book — keyed set of outstanding orders
//!
//! Holds every order that still has unfilled volume, keyed by `order_id`,
//! plus a per-symbol price index used to answer best-price queries.
//! Uses `BTreeMap`/`BTreeSet` so iteration, summaries and hashes are
//! deterministic. Prices are `Decimal`; no floating point is involved in
//! ordering or aggregation.
//!
//! Index ordering, best first:
//! - bids: price descending, then timestamp ascending, then order_id ascending
//! - asks: price ascending, then timestamp ascending, then order_id ascending
//!
//! The first index entry with `timestamp <= as_of` is therefore the best
//! qualifying order, ties already broken by earliest timestamp and lowest id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use types::event::{Action, HistoryRecord};
use types::ids::{OrderId, Symbol};
use types::numeric::Price;
use types::order::{ActiveOrder, Side};

use crate::store::StoreError;

/// Result of applying a trade to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeOutcome {
    /// No such order; nothing changed.
    Unknown,
    /// Order still active with this much volume left.
    Reduced { remaining: u64 },
    /// Traded volume reached (or exceeded) the remaining volume; the order
    /// was removed.
    Closed { order: ActiveOrder },
}

/// Aggregate over the active orders of one `(symbol, side)` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideSummary {
    pub symbol: Symbol,
    pub side: Side,
    pub orders_count: usize,
    /// Sum of remaining volume.
    pub total_volume: u64,
    pub min_price: Price,
    pub max_price: Price,
    /// Exact decimal mean of the order prices.
    pub avg_price: Decimal,
}

type BidKey = (Reverse<Price>, i64, OrderId);
type AskKey = (Price, i64, OrderId);

#[derive(Debug, Clone, Default)]
struct SideIndex {
    bids: BTreeSet<BidKey>,
    asks: BTreeSet<AskKey>,
}

impl SideIndex {
    fn insert(&mut self, order: &ActiveOrder) {
        match order.side {
            Side::Buy => {
                self.bids
                    .insert((Reverse(order.price), order.timestamp, order.order_id));
            }
            Side::Sell => {
                self.asks.insert((order.price, order.timestamp, order.order_id));
            }
        }
    }

    fn remove(&mut self, order: &ActiveOrder) {
        match order.side {
            Side::Buy => {
                self.bids
                    .remove(&(Reverse(order.price), order.timestamp, order.order_id));
            }
            Side::Sell => {
                self.asks
                    .remove(&(order.price, order.timestamp, order.order_id));
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Best-first ids on one side, filtered by creation time.
    fn candidates(&self, side: Side, as_of: i64) -> Box<dyn Iterator<Item = OrderId> + '_> {
        match side {
            Side::Buy => Box::new(
                self.bids
                    .iter()
                    .filter(move |(_, ts, _)| *ts <= as_of)
                    .map(|(_, _, id)| *id),
            ),
            Side::Sell => Box::new(
                self.asks
                    .iter()
                    .filter(move |(_, ts, _)| *ts <= as_of)
                    .map(|(_, _, id)| *id),
            ),
        }
    }
}

/// In-memory set of outstanding orders.
#[derive(Debug, Clone, Default)]
pub struct ActiveBook {
    orders: BTreeMap<OrderId, ActiveOrder>,
    index: BTreeMap<Symbol, SideIndex>,
}

impl ActiveBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from previously persisted orders. Orders that violate
    /// the volume invariant are skipped.
    pub fn from_orders(orders: impl IntoIterator<Item = ActiveOrder>) -> Self {
        let mut book = Self::new();
        for order in orders {
            if order.check_invariant() {
                book.insert_if_absent(order);
            }
        }
        book
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn clear(&mut self) {
        self.orders.clear();
        self.index.clear();
    }

    pub fn get(&self, order_id: OrderId) -> Option<&ActiveOrder> {
        self.orders.get(&order_id)
    }

    /// Orders in `order_id` order.
    pub fn orders(&self) -> impl Iterator<Item = &ActiveOrder> {
        self.orders.values()
    }

    /// Insert a new order unless the id is already present (first writer
    /// wins). Returns whether the order was inserted.
    pub fn insert_if_absent(&mut self, order: ActiveOrder) -> bool {
        if self.orders.contains_key(&order.order_id) || order.remaining_volume == 0 {
            return false;
        }
        self.index
            .entry(order.symbol.clone())
            .or_default()
            .insert(&order);
        self.orders.insert(order.order_id, order);
        true
    }

    /// Apply a trade of `volume` against an order.
    pub fn reduce_or_remove(&mut self, order_id: OrderId, volume: u64) -> TradeOutcome {
        let Some(order) = self.orders.get_mut(&order_id) else {
            return TradeOutcome::Unknown;
        };

        if volume >= order.remaining_volume {
            match self.remove(order_id) {
                Some(order) => TradeOutcome::Closed { order },
                None => TradeOutcome::Unknown,
            }
        } else {
            order.remaining_volume -= volume;
            TradeOutcome::Reduced {
                remaining: order.remaining_volume,
            }
        }
    }

    /// Remove an order if present.
    pub fn remove(&mut self, order_id: OrderId) -> Option<ActiveOrder> {
        let order = self.orders.remove(&order_id)?;
        if let Some(index) = self.index.get_mut(&order.symbol) {
            index.remove(&order);
            if index.is_empty() {
                self.index.remove(&order.symbol);
            }
        }
        Some(order)
    }

    /// Re-apply one archived event the way ingestion applied it.
    pub fn apply_record(&mut self, record: &HistoryRecord) {
        match record.action {
            Action::New => {
                self.insert_if_absent(ActiveOrder::from_event(&record.to_event()));
            }
            Action::Trade => {
                self.reduce_or_remove(record.order_id, record.volume);
            }
            Action::Cancel => {
                self.remove(record.order_id);
            }
        }
    }

    /// Up to `limit` orders, most recently created first, ties by ascending
    /// `order_id`.
    pub fn sample(&self, limit: usize) -> Vec<ActiveOrder> {
        let mut orders: Vec<&ActiveOrder> = self.orders.values().collect();
        orders.sort_by_key(|o| (Reverse(o.timestamp), o.order_id));
        orders.into_iter().take(limit).cloned().collect()
    }

    /// Best standing order on one side of `symbol` created at or before
    /// `as_of`: highest price for bids, lowest for asks.
    pub fn best_price(&self, symbol: &Symbol, side: Side, as_of: i64) -> Option<&ActiveOrder> {
        let index = self.index.get(symbol)?;
        index
            .candidates(side, as_of)
            .filter_map(|id| self.orders.get(&id))
            .find(|order| order.remaining_volume > 0)
    }

    /// Per `(symbol, side)` aggregates, ordered by symbol then side.
    pub fn summary(&self) -> Vec<SideSummary> {
        let mut groups: BTreeMap<(Symbol, Side), SideSummary> = BTreeMap::new();
        let mut price_sums: BTreeMap<(Symbol, Side), Decimal> = BTreeMap::new();

        for order in self.orders.values() {
            let key = (order.symbol.clone(), order.side);
            *price_sums.entry(key.clone()).or_insert(Decimal::ZERO) += order.price.as_decimal();

            groups
                .entry(key)
                .and_modify(|group| {
                    group.orders_count += 1;
                    group.total_volume += order.remaining_volume;
                    group.min_price = group.min_price.min(order.price);
                    group.max_price = group.max_price.max(order.price);
                })
                .or_insert_with(|| SideSummary {
                    symbol: order.symbol.clone(),
                    side: order.side,
                    orders_count: 1,
                    total_volume: order.remaining_volume,
                    min_price: order.price,
                    max_price: order.price,
                    avg_price: Decimal::ZERO,
                });
        }

        groups
            .into_iter()
            .map(|(key, mut group)| {
                let sum = price_sums.get(&key).copied().unwrap_or(Decimal::ZERO);
                group.avg_price = sum / Decimal::from(group.orders_count as u64);
                group
            })
            .collect()
    }

    /// Deterministic SHA-256 over the orders in `order_id` order.
    pub fn state_hash(&self) -> Result<String, StoreError> {
        let orders: Vec<&ActiveOrder> = self.orders.values().collect();
        orders_digest(&orders).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// SHA-256 (hex) over the bincode encoding of `orders`. Callers pass orders
/// in `order_id` order so equal books hash equal.
pub fn orders_digest<T: Serialize>(orders: &[T]) -> Result<String, bincode::Error> {
    let bytes = bincode::serialize(orders)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// `ActiveBook` behind a lock. Every mutation holds the write lock for its
/// whole duration, so readers see an order fully present with consistent
/// volumes or fully absent.
#[derive(Debug, Default)]
pub(crate) struct LockedBook {
    inner: RwLock<ActiveBook>,
}

impl LockedBook {
    pub(crate) fn new(book: ActiveBook) -> Self {
        Self {
            inner: RwLock::new(book),
        }
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, ActiveBook>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::LockPoisoned("active book"))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, ActiveBook>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::LockPoisoned("active book"))
    }
}
