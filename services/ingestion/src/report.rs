//! Post-run analysis of the active set
//!
//! Everything is emitted through `tracing` at info level.

use persistence::{OrderStore, SideSummary, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use types::ids::Symbol;
use types::order::ActiveOrder;

use crate::query::{best_prices, BestPrices};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Count, newest-first sample and per-side aggregates of the active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub active_orders: usize,
    pub sample: Vec<ActiveOrder>,
    pub summary: Vec<SideSummary>,
}

impl AnalysisReport {
    pub fn collect<S: OrderStore + ?Sized>(store: &S, sample_size: usize) -> Result<Self, StoreError> {
        let active_orders = store.count_active_orders()?;
        if active_orders == 0 {
            return Ok(Self {
                active_orders,
                sample: Vec::new(),
                summary: Vec::new(),
            });
        }
        Ok(Self {
            active_orders,
            sample: store.sample_active_orders(sample_size)?,
            summary: store.summarize_active_orders()?,
        })
    }

    pub fn log(&self) {
        info!(active_orders = self.active_orders, "Active order analysis");
        for order in &self.sample {
            info!(
                order_id = order.order_id.value(),
                symbol = %order.symbol,
                side = %order.side,
                price = %order.price,
                remaining = order.remaining_volume,
                original = order.original_volume,
                "Sample order"
            );
        }
        for group in &self.summary {
            info!(
                symbol = %group.symbol,
                side = %group.side,
                orders = group.orders_count,
                volume = group.total_volume,
                min_price = %group.min_price,
                max_price = %group.max_price,
                avg_price = %group.avg_price,
                "Side summary"
            );
        }
    }
}

/// Query and log best prices for each symbol, one JSON line per symbol.
pub fn log_best_prices<S: OrderStore + ?Sized>(
    store: &S,
    symbols: &[Symbol],
    as_of: Option<i64>,
) -> Result<Vec<BestPrices>, ReportError> {
    let mut results = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let best = best_prices(store, symbol, as_of)?;
        info!(
            symbol = %symbol,
            best = %serde_json::to_string(&best)?,
            spread = ?best.spread(),
            "Best prices"
        );
        results.push(best);
    }
    Ok(results)
}
