//! Best-price query
//!
//! A read over the active set: the highest bid and the lowest ask for one
//! symbol among orders created at or before `as_of` with volume left.
//! Results reflect whatever the store has committed when each side is read.

use persistence::{OrderStore, StoreError};
use serde::Serialize;
use types::ids::Symbol;
use types::order::{ActiveOrder, Side};

/// Cutoff used when the caller gives none; later than any feed timestamp.
pub const UNBOUNDED_AS_OF: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestPrices {
    pub symbol: Symbol,
    pub timestamp: i64,
    pub best_buy: Option<ActiveOrder>,
    pub best_sell: Option<ActiveOrder>,
}

impl BestPrices {
    pub fn side(&self, side: Side) -> Option<&ActiveOrder> {
        match side {
            Side::Buy => self.best_buy.as_ref(),
            Side::Sell => self.best_sell.as_ref(),
        }
    }

    /// Ask minus bid, when both sides are present.
    pub fn spread(&self) -> Option<rust_decimal::Decimal> {
        let buy = self.best_buy.as_ref()?;
        let sell = self.best_sell.as_ref()?;
        Some(sell.price.as_decimal() - buy.price.as_decimal())
    }
}

pub fn best_prices<S: OrderStore + ?Sized>(
    store: &S,
    symbol: &Symbol,
    as_of: Option<i64>,
) -> Result<BestPrices, StoreError> {
    let timestamp = as_of.unwrap_or(UNBOUNDED_AS_OF);
    Ok(BestPrices {
        symbol: symbol.clone(),
        timestamp,
        best_buy: store.query_best_price(symbol, Side::Buy, timestamp)?,
        best_sell: store.query_best_price(symbol, Side::Sell, timestamp)?,
    })
}
