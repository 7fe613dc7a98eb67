//! Identifier types for feed entities
//!
//! Order ids come straight from the exchange feed and are plain integers.
//! They are not unique across action types: trades and cancellations refer
//! back to the id carried by an earlier New event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(u64);

impl OrderId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instrument identifier (e.g. "SiH1", "RIH1")
///
/// Symbols are taken verbatim from the feed; no case folding is applied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Try to create a Symbol, returning None for an empty or blank string
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_ordering() {
        assert!(OrderId::new(100) < OrderId::new(105));
        assert_eq!(OrderId::from(7).value(), 7);
    }

    #[test]
    fn test_order_id_serialization() {
        let id = OrderId::new(104);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "104");
        let deserialized: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_symbol_try_new() {
        assert!(Symbol::try_new("RIH1").is_some());
        assert!(Symbol::try_new("").is_none());
        assert!(Symbol::try_new("   ").is_none());
    }

    #[test]
    fn test_symbol_is_case_sensitive() {
        assert_ne!(Symbol::new("SiH1"), Symbol::new("SIH1"));
        assert_eq!(Symbol::from("SiH1").as_str(), "SiH1");
    }
}
