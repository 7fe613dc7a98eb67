//! Order event state machine
//!
//! | action     | effect on the active set                       |
//! |------------|------------------------------------------------|
//! | New (1)    | insert if `order_id` is not already active     |
//! | Trade (2)  | reduce remaining volume, remove once exhausted |
//! | Cancel (0) | remove                                         |
//!
//! Every applied event yields exactly one `HistoryRecord`, whatever it did
//! to the active set. Trades and cancels for unknown ids are no-ops, not
//! errors. Each action maps to a single store mutation, which the store
//! performs atomically, so two events racing on one `order_id` serialize.

use persistence::{OrderStore, StoreError, TradeOutcome};
use thiserror::Error;
use tracing::trace;
use types::errors::EventError;
use types::event::{Action, HistoryRecord, OrderEvent};
use types::order::ActiveOrder;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] EventError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// What an event did to the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    /// New for an id that is already active; the first order is kept.
    DuplicateIgnored,
    Reduced { remaining: u64 },
    /// Trade exhausted (or over-reported) the remaining volume.
    Filled,
    Cancelled,
    /// Trade or Cancel for an id that is not active.
    UnknownReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub record: HistoryRecord,
    pub transition: Transition,
}

pub struct OrderStateMachine<'a, S: OrderStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: OrderStore + ?Sized> OrderStateMachine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Apply one event. A malformed event is rejected before the store is
    /// touched.
    pub fn apply(&self, event: &OrderEvent) -> Result<Applied, ApplyError> {
        event.validate()?;

        let transition = match event.action {
            Action::New => {
                if self
                    .store
                    .upsert_active_order_if_absent(ActiveOrder::from_event(event))?
                {
                    Transition::Opened
                } else {
                    Transition::DuplicateIgnored
                }
            }
            Action::Trade => {
                match self
                    .store
                    .reduce_or_remove_active_order(event.order_id, event.volume)?
                {
                    TradeOutcome::Unknown => Transition::UnknownReference,
                    TradeOutcome::Reduced { remaining } => Transition::Reduced { remaining },
                    TradeOutcome::Closed { .. } => Transition::Filled,
                }
            }
            Action::Cancel => match self.store.delete_active_order(event.order_id)? {
                Some(_) => Transition::Cancelled,
                None => Transition::UnknownReference,
            },
        };

        trace!(
            order_id = event.order_id.value(),
            action = event.action.label(),
            ?transition,
            "Event applied"
        );

        Ok(Applied {
            record: HistoryRecord::from(event),
            transition,
        })
    }
}
