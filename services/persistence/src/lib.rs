//! Persistence service for the order-event feed
//!
//! Owns the active-order set and the append-only history archive behind a
//! single `OrderStore` contract with two backends:
//! - `MemoryStore`: in-process, nothing survives the handle
//! - `FileStore`: checksummed history journal plus integrity-checked
//!   active-order snapshots
//!
//! The backend is picked at startup from `StoreConfig` via `open_store`.

pub mod book;
pub mod config;
pub mod file;
pub mod journal;
pub mod memory;
pub mod reader;
pub mod snapshot;
pub mod store;

pub use book::{ActiveBook, SideSummary, TradeOutcome};
pub use config::{FileStoreConfig, StoreConfig};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{OrderStore, StoreError};

use tracing::info;

/// Open the backend selected by `config`. The returned handle is closed on
/// drop; call `close()` to observe close errors.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn OrderStore>, StoreError> {
    let store: Box<dyn OrderStore> = match config {
        StoreConfig::Memory => Box::new(MemoryStore::new()),
        StoreConfig::File(file) => Box::new(FileStore::open(file.clone())?),
    };
    info!(backend = store.backend(), "Store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_selects_backend() {
        let memory = open_store(&StoreConfig::Memory).unwrap();
        assert_eq!(memory.backend(), "memory");

        let tmp = TempDir::new().unwrap();
        let file = open_store(&StoreConfig::File(FileStoreConfig::new(tmp.path()))).unwrap();
        assert_eq!(file.backend(), "file");
        file.close().unwrap();
    }
}
