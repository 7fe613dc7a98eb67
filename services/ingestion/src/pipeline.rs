//! Batch ingestion pipeline
//!
//! Full-reload semantics: every run clears the store and replays the source
//! from its first event. Events are applied strictly in source order; the
//! batch size only controls how many history records go into one bulk
//! write.
//!
//! Flushing is inline by default. With `pipelined_flush`, full batches are
//! handed by value to a scoped worker thread that writes them in order while
//! the next batch is applied; the worker's result is joined before the run
//! reports success.
//!
//! A failed flush is fatal unless `flush_retries` is set, in which case the
//! identical batch is retried that many more times.

use persistence::{OrderStore, StoreError};
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use types::event::HistoryRecord;

use crate::config::{ConfigError, IngestConfig};
use crate::source::{EventIter, EventSource, SourceError};
use crate::state_machine::{ApplyError, OrderStateMachine, Transition};

// ── Errors ──────────────────────────────────────────────────────────

/// Part of the run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Read,
    Apply,
    Flush,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Read => write!(f, "read"),
            Stage::Apply => write!(f, "apply"),
            Stage::Flush => write!(f, "flush"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("read failed after {processed} events: {source}")]
    Read {
        processed: u64,
        #[source]
        source: SourceError,
    },

    #[error("apply failed at event {index}: {source}")]
    Apply {
        /// 1-based position of the rejected event.
        index: u64,
        #[source]
        source: ApplyError,
    },

    #[error("history flush failed for batch {batch} ({records} records) after {attempts} attempt(s): {source}")]
    Flush {
        batch: u64,
        records: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("store {operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("flush worker stopped unexpectedly")]
    FlushWorkerLost,
}

impl IngestError {
    pub fn stage(&self) -> Stage {
        match self {
            IngestError::Read { .. } => Stage::Read,
            IngestError::Apply { .. } => Stage::Apply,
            IngestError::Flush { .. }
            | IngestError::Store { .. }
            | IngestError::FlushWorkerLost => Stage::Flush,
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub events_processed: u64,
    /// Active orders left in the store at the end of the run.
    pub active_orders: usize,
    pub batches_flushed: u64,
    pub history_records: u64,
    pub flush_retries: u64,
    pub orders_created: u64,
    pub duplicate_news: u64,
    pub orders_reduced: u64,
    pub orders_closed: u64,
    pub orders_cancelled: u64,
    pub unknown_references: u64,
    pub elapsed_ms: u64,
}

impl IngestReport {
    fn record(&mut self, transition: Transition) {
        self.events_processed += 1;
        match transition {
            Transition::Opened => self.orders_created += 1,
            Transition::DuplicateIgnored => self.duplicate_news += 1,
            Transition::Reduced { .. } => self.orders_reduced += 1,
            Transition::Filled => self.orders_closed += 1,
            Transition::Cancelled => self.orders_cancelled += 1,
            Transition::UnknownReference => self.unknown_references += 1,
        }
    }

    fn absorb(&mut self, stats: FlushStats) {
        self.batches_flushed += stats.batches;
        self.history_records += stats.records;
        self.flush_retries += stats.retries;
    }
}

// ── Flushing ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct FlushStats {
    batches: u64,
    records: u64,
    retries: u64,
}

/// Where full batches go once the state machine has produced them.
trait BatchSink {
    fn submit(&mut self, batch: Vec<HistoryRecord>) -> Result<(), IngestError>;
}

/// Writes each batch on the calling thread, retrying the same batch on
/// failure when configured to.
struct InlineFlusher<'a, S: OrderStore + ?Sized> {
    store: &'a S,
    retries: u32,
    backoff: Duration,
    stats: FlushStats,
}

impl<'a, S: OrderStore + ?Sized> InlineFlusher<'a, S> {
    fn new(store: &'a S, config: &IngestConfig) -> Self {
        Self {
            store,
            retries: config.flush_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            stats: FlushStats::default(),
        }
    }

    fn flush(&mut self, batch: &[HistoryRecord]) -> Result<(), IngestError> {
        let batch_no = self.stats.batches + 1;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store.insert_history_batch(batch) {
                Ok(()) => {
                    self.stats.batches += 1;
                    self.stats.records += batch.len() as u64;
                    debug!(
                        batch = batch_no,
                        records = batch.len(),
                        total_records = self.stats.records,
                        "History batch flushed"
                    );
                    return Ok(());
                }
                Err(e) if attempts <= self.retries => {
                    self.stats.retries += 1;
                    warn!(
                        batch = batch_no,
                        attempt = attempts,
                        max_attempts = self.retries + 1,
                        error = %e,
                        "History flush failed, retrying same batch"
                    );
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                }
                Err(source) => {
                    error!(
                        batch = batch_no,
                        records = batch.len(),
                        attempts,
                        error = %source,
                        "History flush failed"
                    );
                    return Err(IngestError::Flush {
                        batch: batch_no,
                        records: batch.len(),
                        attempts,
                        source,
                    });
                }
            }
        }
    }
}

impl<S: OrderStore + ?Sized> BatchSink for InlineFlusher<'_, S> {
    fn submit(&mut self, batch: Vec<HistoryRecord>) -> Result<(), IngestError> {
        self.flush(&batch)
    }
}

/// Hands batches to the flush worker. The batch is moved, so it cannot be
/// touched once submitted.
struct ChannelSink {
    tx: SyncSender<Vec<HistoryRecord>>,
}

impl BatchSink for ChannelSink {
    fn submit(&mut self, batch: Vec<HistoryRecord>) -> Result<(), IngestError> {
        self.tx
            .send(batch)
            .map_err(|_| IngestError::FlushWorkerLost)
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

pub struct IngestPipeline<'a, S: OrderStore + ?Sized> {
    store: &'a S,
    config: IngestConfig,
}

impl<'a, S: OrderStore + ?Sized> IngestPipeline<'a, S> {
    pub fn new(store: &'a S, config: IngestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Rebuild the store from `source`.
    ///
    /// The source is opened (and its layout checked) before the store is
    /// cleared, so a format error leaves existing state alone. On any later
    /// failure the events applied so far stay in the store together with
    /// their history records.
    pub fn ingest(&self, source: &dyn EventSource) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        info!(
            source = %source.describe(),
            backend = self.store.backend(),
            batch_size = self.config.batch_size,
            limit = ?self.config.limit,
            pipelined = self.config.pipelined_flush,
            "Ingestion started"
        );

        let events = source
            .events()
            .map_err(|source| IngestError::Read { processed: 0, source })?;

        self.store.clear().map_err(|source| IngestError::Store {
            operation: "clear",
            source,
        })?;

        let mut report = IngestReport::default();
        let outcome = if self.config.pipelined_flush {
            self.run_pipelined(events, &mut report)
        } else {
            let mut flusher = InlineFlusher::new(self.store, &self.config);
            let applied = self.apply_all(events, &mut report, &mut flusher);
            report.absorb(flusher.stats);
            applied
        };

        if let Err(e) = outcome {
            error!(
                stage = %e.stage(),
                processed = report.events_processed,
                flushed_records = report.history_records,
                error = %e,
                "Ingestion aborted"
            );
            return Err(e);
        }

        report.active_orders = self
            .store
            .count_active_orders()
            .map_err(|source| IngestError::Store {
                operation: "count",
                source,
            })?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            processed = report.events_processed,
            active_orders = report.active_orders,
            batches = report.batches_flushed,
            created = report.orders_created,
            closed = report.orders_closed,
            cancelled = report.orders_cancelled,
            unknown_references = report.unknown_references,
            elapsed_ms = report.elapsed_ms,
            "Ingestion completed"
        );
        Ok(report)
    }

    fn run_pipelined(
        &self,
        events: EventIter<'_>,
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let store = self.store;
        let config = &self.config;

        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Vec<HistoryRecord>>(1);

            let worker = scope.spawn(move || {
                let mut flusher = InlineFlusher::new(store, config);
                for batch in rx {
                    if let Err(e) = flusher.flush(&batch) {
                        return (flusher.stats, Err(e));
                    }
                }
                (flusher.stats, Ok(()))
            });

            let mut sink = ChannelSink { tx };
            let applied = self.apply_all(events, report, &mut sink);
            drop(sink);

            let flushed = match worker.join() {
                Ok((stats, result)) => {
                    report.absorb(stats);
                    result
                }
                Err(_) => Err(IngestError::FlushWorkerLost),
            };

            match (applied, flushed) {
                (Err(IngestError::FlushWorkerLost), Err(flush_error)) => Err(flush_error),
                (Err(apply_error), Err(flush_error)) => {
                    error!(error = %flush_error, "History flush also failed");
                    Err(apply_error)
                }
                (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
                (Ok(()), Ok(())) => Ok(()),
            }
        })
    }

    /// Apply events in order, submitting full batches to `sink`. Whatever
    /// was applied before a read or apply failure is still submitted.
    fn apply_all<K: BatchSink>(
        &self,
        mut events: EventIter<'_>,
        report: &mut IngestReport,
        sink: &mut K,
    ) -> Result<(), IngestError> {
        let machine = OrderStateMachine::new(self.store);
        let batch_size = self.config.batch_size;
        let mut batch: Vec<HistoryRecord> = Vec::with_capacity(batch_size);
        let mut outcome = Ok(());

        loop {
            if let Some(limit) = self.config.limit {
                if report.events_processed >= limit {
                    debug!(limit, "Event limit reached");
                    break;
                }
            }

            let event = match events.next() {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(source)) => {
                    outcome = Err(IngestError::Read {
                        processed: report.events_processed,
                        source,
                    });
                    break;
                }
            };

            match machine.apply(&event) {
                Ok(applied) => {
                    report.record(applied.transition);
                    batch.push(applied.record);
                }
                Err(source) => {
                    outcome = Err(IngestError::Apply {
                        index: report.events_processed + 1,
                        source,
                    });
                    break;
                }
            }

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                sink.submit(full)?;
                debug!(processed = report.events_processed, "Batch submitted");
            }
        }

        if !batch.is_empty() {
            if let Err(flush_error) = sink.submit(batch) {
                if outcome.is_ok() {
                    return Err(flush_error);
                }
                error!(error = %flush_error, "Final partial batch could not be flushed");
            }
        }
        outcome
    }
}
