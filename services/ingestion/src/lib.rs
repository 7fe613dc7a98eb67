//! Order-event ingestion
//!
//! Reads an exchange order feed, drives every event through the order
//! state machine into an `OrderStore`, archives one history record per
//! event in batches, and answers best-price queries over the result.
//!
//! # Modules
//! - `source`: CSV layouts and restartable event sources
//! - `state_machine`: New / Trade / Cancel transitions
//! - `pipeline`: Batched full-reload ingestion with optional pipelined flush
//! - `query`: Best bid / ask per symbol
//! - `replay`: History replay and active-set comparison
//! - `report`: Post-run analysis logging
//! - `config`: TOML run configuration

pub mod config;
pub mod pipeline;
pub mod query;
pub mod replay;
pub mod report;
pub mod source;
pub mod state_machine;

pub use config::{AppConfig, ConfigError, IngestConfig, ReportConfig, SourceConfig};
pub use pipeline::{IngestError, IngestPipeline, IngestReport, Stage};
pub use query::{best_prices, BestPrices, UNBOUNDED_AS_OF};
pub use replay::{replay_history, verify_archive, verify_replay, DivergenceReport, ReplayError};
pub use report::{log_best_prices, AnalysisReport, ReportError};
pub use source::{
    CsvFileSource, CsvTextSource, EventSource, Layout, LayoutChoice, SourceError, VecSource,
};
pub use state_machine::{ApplyError, OrderStateMachine, Transition};
