//! Types library for the order-event feed
//!
//! This library provides the typed representation of one exchange order
//! event (new / trade / cancel), the outstanding order derived from it, and
//! the archived history record written for every processed event.
//!
//! # Modules
//! - `ids`: Identifiers (OrderId, Symbol)
//! - `numeric`: Fixed-point decimal price
//! - `order`: Side and the outstanding `ActiveOrder`
//! - `event`: `Action`, `OrderEvent`, `HistoryRecord`
//! - `errors`: Malformed-event taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod order;
pub mod event;
pub mod errors;
