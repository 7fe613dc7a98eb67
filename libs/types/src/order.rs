//! Outstanding order types
//!
//! An `ActiveOrder` exists only while it has unfilled volume. It is created
//! by a New event, shrunk by Trade events, and removed by a Cancel or by a
//! Trade that exhausts it. A zero-volume order is never retained.

use crate::errors::EventError;
use crate::event::OrderEvent;
use crate::ids::{OrderId, Symbol};
use crate::numeric::Price;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Parse the feed side code
    pub fn from_code(code: &str) -> Result<Self, EventError> {
        match code.trim() {
            "B" | "b" => Ok(Side::Buy),
            "S" | "s" => Ok(Side::Sell),
            "" => Err(EventError::MissingField { field: "side" }),
            other => Err(EventError::UnknownSide(other.to_string())),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// An outstanding order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveOrder {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub original_volume: u64,
    pub remaining_volume: u64,
    /// Feed time of order creation
    pub timestamp: i64,
}

impl ActiveOrder {
    pub fn new(
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        price: Price,
        volume: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id,
            symbol,
            side,
            price,
            original_volume: volume,
            remaining_volume: volume,
            timestamp,
        }
    }

    /// Build the order a New event opens. Price, volume and timestamp of the
    /// event become the order's identity.
    pub fn from_event(event: &OrderEvent) -> Self {
        Self::new(
            event.order_id,
            event.symbol.clone(),
            event.side,
            event.price,
            event.volume,
            event.timestamp,
        )
    }

    /// `0 < remaining_volume <= original_volume`
    pub fn check_invariant(&self) -> bool {
        self.remaining_volume > 0 && self.remaining_volume <= self.original_volume
    }
}
