//! Persistence for the workbench.
//!
//! `PgStore` is the production store; `MemoryStore` keeps the same
//! contract in process for tests and database-less runs.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::{PgStore, SCHEMA_SQL};

use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use workbench_core::{Store, StoreError};

/// Open the configured store.
///
/// Without a DSN the process runs on an in-memory store and nothing
/// survives a restart.
pub async fn open_store(
    dsn: Option<&str>,
    min_connections: u32,
    max_connections: u32,
    schema_path: Option<&Path>,
) -> Result<Arc<dyn Store>, StoreError> {
    match dsn.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dsn) => {
            let store = PgStore::connect(dsn, min_connections, max_connections).await?;
            store.init_schema(schema_path).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workbench_core::Timeframe;

    #[tokio::test]
    async fn test_open_without_dsn_is_memory() {
        let store = open_store(Some("  "), 1, 5, None).await.unwrap();
        assert!(store.latest_bar_ts("EURUSD", Timeframe::H1).await.unwrap().is_none());
    }
}
