//! Order event types
//!
//! One `OrderEvent` per feed row. The `action` alone selects the transition
//! applied to the active-order set; no other field combination changes
//! behavior. Every processed event is archived verbatim as a `HistoryRecord`.

use crate::errors::EventError;
use crate::ids::{OrderId, Symbol};
use crate::numeric::Price;
use crate::order::Side;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind, with the feed's numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Code 0: order withdrawn
    Cancel,
    /// Code 1: order placed
    New,
    /// Code 2: order (partially) executed
    Trade,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Cancel => "Cancel",
            Action::New => "New",
            Action::Trade => "Trade",
        }
    }
}

impl TryFrom<i64> for Action {
    type Error = EventError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::Cancel),
            1 => Ok(Action::New),
            2 => Ok(Action::Trade),
            other => Err(EventError::UnknownAction(other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unparsed field values of one feed row, borrowed from the source line.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent<'a> {
    pub symbol: &'a str,
    pub side: &'a str,
    pub timestamp: &'a str,
    pub order_id: &'a str,
    pub action: &'a str,
    pub price: &'a str,
    pub volume: &'a str,
}

/// A single order event from the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub volume: u64,
    /// Feed time. Used as an ordering and filter key, not guaranteed to be
    /// strictly increasing across the feed.
    pub timestamp: i64,
    pub action: Action,
}

impl OrderEvent {
    pub fn new(
        action: Action,
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
            volume,
            timestamp,
            action,
        }
    }

    /// Parse and validate one feed row.
    pub fn from_raw(raw: &RawEvent<'_>) -> Result<Self, EventError> {
        let action_code: i64 = parse_field("action", raw.action)?;
        let action = Action::try_from(action_code)?;

        let symbol = Symbol::try_new(raw.symbol.trim()).ok_or(EventError::EmptySymbol)?;
        let side = Side::from_code(raw.side)?;
        let order_id = OrderId::new(parse_field("order_id", raw.order_id)?);
        let timestamp = parse_field("timestamp", raw.timestamp)?;
        let volume = parse_field("volume", raw.volume)?;

        let price_text = raw.price.trim();
        if price_text.is_empty() {
            return Err(EventError::MissingField { field: "price" });
        }
        let price = price_text
            .parse::<Price>()
            .map_err(|_| EventError::invalid("price", price_text))?;

        let event = Self::new(action, order_id, symbol, side, price, volume, timestamp);
        event.validate()?;
        Ok(event)
    }

    /// Check the event-level rules that hold regardless of how the event was
    /// built.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.symbol.as_str().trim().is_empty() {
            return Err(EventError::EmptySymbol);
        }
        if self.price.is_negative() {
            return Err(EventError::invalid("price", &self.price.to_string()));
        }
        if self.action == Action::New && self.volume == 0 {
            return Err(EventError::ZeroVolume {
                order_id: self.order_id.value(),
            });
        }
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, EventError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EventError::MissingField { field });
    }
    value.parse().map_err(|_| EventError::invalid(field, value))
}

/// Immutable archival copy of a processed event
///
/// Written for every event regardless of what the state machine did with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub symbol: Symbol,
    pub side: Side,
    pub timestamp: i64,
    pub order_id: OrderId,
    pub action: Action,
    pub price: Price,
    pub volume: u64,
}

impl HistoryRecord {
    /// Rebuild the event this record archived (used for replay).
    pub fn to_event(&self) -> OrderEvent {
        OrderEvent::new(
            self.action,
            self.order_id,
            self.symbol.clone(),
            self.side,
            self.price,
            self.volume,
            self.timestamp,
        )
    }
}

impl From<&OrderEvent> for HistoryRecord {
    fn from(event: &OrderEvent) -> Self {
        Self {
            symbol: event.symbol.clone(),
            side: event.side,
            timestamp: event.timestamp,
            order_id: event.order_id,
            action: event.action,
            price: event.price,
            volume: event.volume,
        }
    }
}
