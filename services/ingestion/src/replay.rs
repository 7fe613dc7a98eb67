//! History replay and determinism verification
//!
//! The archive holds every applied event in order, so replaying it through
//! the state machine into an empty store must rebuild the same active set.
//! `verify_replay` compares two stores by state hash and, on mismatch,
//! lists the diverging order ids.

use persistence::{MemoryStore, OrderStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};
use types::event::HistoryRecord;
use types::ids::OrderId;
use types::order::ActiveOrder;

use crate::state_machine::{ApplyError, OrderStateMachine};

/// How many diverging ids a report spells out.
const MAX_LISTED_IDS: usize = 10;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("replay failed at record {index}: {source}")]
    Apply {
        index: usize,
        #[source]
        source: ApplyError,
    },

    #[error("store error during replay: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub records_applied: usize,
    pub active_orders: usize,
    pub state_hash: String,
}

// ── Replay ──────────────────────────────────────────────────────────

/// Reset `target` and re-apply `records` in order. Records are not
/// archived again, so the target's history stays empty.
pub fn replay_history<S: OrderStore + ?Sized>(
    records: &[HistoryRecord],
    target: &S,
) -> Result<ReplaySummary, ReplayError> {
    target.clear()?;
    let machine = OrderStateMachine::new(target);

    for (index, record) in records.iter().enumerate() {
        machine
            .apply(&record.to_event())
            .map_err(|source| ReplayError::Apply {
                index: index + 1,
                source,
            })?;
    }

    let summary = ReplaySummary {
        records_applied: records.len(),
        active_orders: target.count_active_orders()?,
        state_hash: target.state_hash()?,
    };
    info!(
        records = summary.records_applied,
        active_orders = summary.active_orders,
        backend = target.backend(),
        "History replayed"
    );
    Ok(summary)
}

// ── Divergence Report ───────────────────────────────────────────────

/// Result of comparing two stores' active sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    pub hash_a: String,
    pub hash_b: String,
    pub orders_a: usize,
    pub orders_b: usize,
    /// Ids active only in the first store.
    pub only_in_a: Vec<OrderId>,
    /// Ids active only in the second store.
    pub only_in_b: Vec<OrderId>,
    /// Ids active in both with different contents.
    pub changed: Vec<OrderId>,
    pub detail: String,
}

impl DivergenceReport {
    pub fn is_match(&self) -> bool {
        self.hash_a == self.hash_b
    }
}

/// Compare the active sets of two stores.
pub fn verify_replay<A, B>(a: &A, b: &B) -> Result<DivergenceReport, StoreError>
where
    A: OrderStore + ?Sized,
    B: OrderStore + ?Sized,
{
    let hash_a = a.state_hash()?;
    let hash_b = b.state_hash()?;
    let orders_a = index_orders(a.sample_active_orders(usize::MAX)?);
    let orders_b = index_orders(b.sample_active_orders(usize::MAX)?);

    let mut only_in_a = Vec::new();
    let mut changed = Vec::new();
    for (id, order) in &orders_a {
        match orders_b.get(id) {
            None => only_in_a.push(*id),
            Some(other) if other != order => changed.push(*id),
            Some(_) => {}
        }
    }
    let only_in_b: Vec<OrderId> = orders_b
        .keys()
        .filter(|id| !orders_a.contains_key(id))
        .copied()
        .collect();

    let mut details = Vec::new();
    if !only_in_a.is_empty() {
        details.push(format!("only in first: {}", list_ids(&only_in_a)));
    }
    if !only_in_b.is_empty() {
        details.push(format!("only in second: {}", list_ids(&only_in_b)));
    }
    if !changed.is_empty() {
        details.push(format!("changed: {}", list_ids(&changed)));
    }
    let detail = if details.is_empty() {
        "States are identical".to_string()
    } else {
        details.join("; ")
    };

    let report = DivergenceReport {
        hash_a,
        hash_b,
        orders_a: orders_a.len(),
        orders_b: orders_b.len(),
        only_in_a,
        only_in_b,
        changed,
        detail,
    };
    if !report.is_match() {
        warn!(
            hash_a = %report.hash_a,
            hash_b = %report.hash_b,
            detail = %report.detail,
            "Active sets diverge"
        );
    }
    Ok(report)
}

/// Replay `store`'s own archive into a scratch memory store and compare.
pub fn verify_archive<S: OrderStore + ?Sized>(store: &S) -> Result<DivergenceReport, ReplayError> {
    let records = store.load_history()?;
    let scratch = MemoryStore::new();
    replay_history(&records, &scratch)?;
    Ok(verify_replay(store, &scratch)?)
}

fn index_orders(orders: Vec<ActiveOrder>) -> BTreeMap<OrderId, ActiveOrder> {
    orders.into_iter().map(|o| (o.order_id, o)).collect()
}

fn list_ids(ids: &[OrderId]) -> String {
    let mut listed: Vec<String> = ids
        .iter()
        .take(MAX_LISTED_IDS)
        .map(|id| id.value().to_string())
        .collect();
    if ids.len() > MAX_LISTED_IDS {
        listed.push(format!("... ({} total)", ids.len()));
    }
    listed.join(", ")
}
