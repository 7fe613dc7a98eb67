//! tick-ingest: load an order feed into the configured store and report on it
//!
//! Usage: `tick-ingest [config.toml]`. Without a path the built-in defaults
//! are used (memory store, `resources/feed.csv`).

use anyhow::{anyhow, Context};
use ingestion::{
    log_best_prices, verify_archive, AnalysisReport, AppConfig, CsvFileSource, IngestPipeline,
};
use persistence::open_store;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::ids::Symbol;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            AppConfig::default()
        }
    };

    let symbols = config
        .report
        .symbols
        .iter()
        .map(|s| Symbol::try_new(s.as_str()).ok_or_else(|| anyhow!("empty symbol in report.symbols")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Dropping the handle closes it on every early return below.
    let store = open_store(&config.store).context("opening store")?;

    let source = CsvFileSource::new(&config.source.path, config.source.layout);
    let pipeline = IngestPipeline::new(&*store, config.ingest.clone())?;

    let report = match pipeline.ingest(&source) {
        Ok(report) => report,
        Err(e) => {
            let stage = e.stage();
            error!(stage = %stage, error = %e, "Ingestion failed");
            return Err(anyhow::Error::new(e).context(format!("{} stage failed", stage)));
        }
    };
    info!(report = %serde_json::to_string(&report)?, "Ingestion report");

    AnalysisReport::collect(&*store, config.report.sample_size)
        .context("collecting analysis")?
        .log();
    log_best_prices(&*store, &symbols, config.report.as_of).context("querying best prices")?;

    if config.report.verify_replay {
        let divergence = verify_archive(&*store).context("verifying history replay")?;
        if divergence.is_match() {
            info!(state_hash = %divergence.hash_a, "History replay matches active set");
        } else {
            warn!(detail = %divergence.detail, "History replay diverges from active set");
        }
    }

    store.close().context("closing store")?;
    Ok(())
}
