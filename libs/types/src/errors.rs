//! Error types for the event model
//!
//! A malformed event is an upstream contract violation, never an expected
//! business condition; callers surface it instead of skipping the record.

use thiserror::Error;

/// Reasons an order event cannot be constructed or applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Unknown action code: {0} (expected 0=cancel, 1=new, 2=trade)")]
    UnknownAction(i64),

    #[error("Unknown side code: {0:?} (expected B or S)")]
    UnknownSide(String),

    #[error("Missing field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Empty symbol")]
    EmptySymbol,

    #[error("New order {order_id} has zero volume")]
    ZeroVolume { order_id: u64 },
}

impl EventError {
    pub(crate) fn invalid(field: &'static str, value: &str) -> Self {
        EventError::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}
