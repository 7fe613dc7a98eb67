//! Memory and file backends must be indistinguishable through `OrderStore`.

use ingestion::{
    best_prices, verify_archive, verify_replay, AnalysisReport, CsvTextSource, IngestConfig,
    IngestPipeline, LayoutChoice,
};
use persistence::{open_store, FileStore, FileStoreConfig, MemoryStore, OrderStore, StoreConfig};
use tempfile::TempDir;
use types::ids::Symbol;

const FEED: &str = "\
symbol,type,moment,id,action,price,volume
SiH1,B,1,100,1,75951,50
RIH1,S,1,101,1,137100,4
RIH1,S,2,102,1,137100.5,3
EuH1,B,2,103,1,92186,30
RIH1,B,3,104,1,137105,10
RIH1,S,3,101,2,137100,4
RIH1,B,3,104,2,137105,4
SiH1,B,4,106,1,75952,7
RIH1,B,3,104,2,137105,3
EuH1,B,5,103,0,92186,30
SiH1,S,6,105,1,79500,100
SiH1,S,7,107,1,79499.75,1
RIH1,B,8,999,2,1,1
SiH1,B,9,100,1,1,1
";

fn run(store: &dyn OrderStore, batch_size: usize, pipelined: bool) {
    IngestPipeline::new(
        store,
        IngestConfig {
            batch_size,
            pipelined_flush: pipelined,
            ..IngestConfig::default()
        },
    )
    .unwrap()
    .ingest(&CsvTextSource::new(FEED, LayoutChoice::Auto))
    .unwrap();
}

fn assert_same_reads(a: &dyn OrderStore, b: &dyn OrderStore) {
    assert_eq!(a.state_hash().unwrap(), b.state_hash().unwrap());
    assert_eq!(a.count_active_orders().unwrap(), b.count_active_orders().unwrap());
    assert_eq!(a.sample_active_orders(100).unwrap(), b.sample_active_orders(100).unwrap());
    assert_eq!(
        a.summarize_active_orders().unwrap(),
        b.summarize_active_orders().unwrap()
    );
    for symbol in ["SiH1", "RIH1", "EuH1", "none"] {
        let symbol = Symbol::new(symbol);
        for as_of in [Some(0), Some(3), None] {
            assert_eq!(
                best_prices(a, &symbol, as_of).unwrap(),
                best_prices(b, &symbol, as_of).unwrap()
            );
        }
    }
}

#[test]
fn test_memory_and_file_agree() {
    let tmp = TempDir::new().unwrap();
    let memory = MemoryStore::new();
    let file = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();

    run(&memory, 4, false);
    run(&file, 4, true);

    assert_same_reads(&memory, &file);
    assert_eq!(memory.load_history().unwrap(), file.load_history().unwrap());
    assert!(verify_replay(&memory, &file).unwrap().is_match());
    assert_eq!(
        AnalysisReport::collect(&memory, 3).unwrap(),
        AnalysisReport::collect(&file, 3).unwrap()
    );
    file.close().unwrap();
}

#[test]
fn test_file_store_answers_after_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = StoreConfig::File(FileStoreConfig::new(tmp.path()));

    let memory = MemoryStore::new();
    run(&memory, 3, false);

    {
        let store = open_store(&config).unwrap();
        run(&*store, 3, false);
        store.close().unwrap();
    }

    let reopened = open_store(&config).unwrap();
    assert_same_reads(&memory, &*reopened);
    assert_eq!(reopened.load_history().unwrap().len(), 14);
    assert!(verify_archive(&*reopened).unwrap().is_match());
}

#[test]
fn test_file_store_reingest_replaces_state() {
    let tmp = TempDir::new().unwrap();
    let store = FileStore::open(FileStoreConfig::new(tmp.path())).unwrap();
    run(&store, 5, false);
    run(&store, 2, false);

    assert_eq!(store.load_history().unwrap().len(), 14);
    let memory = MemoryStore::new();
    run(&memory, 5, false);
    assert_same_reads(&memory, &store);
}
