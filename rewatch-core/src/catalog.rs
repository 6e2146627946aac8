//! Library catalog synchronization
//!
//! The engine only reads the catalog; this module populates it from a
//! [`CatalogSource`] so runtimes are available to the session reconstructor
//! and the completion-ratio refresher. Items that disappeared from the
//! library are pruned after the upsert pass.

use std::collections::HashSet;

use crate::db::Database;
use crate::error::Result;
use crate::source::CatalogSource;

/// Result of a catalog sync.
#[derive(Debug, Clone, Default)]
pub struct CatalogSyncResult {
    /// Items inserted or updated
    pub upserted: usize,
    /// Rows removed because the library no longer has them
    pub pruned: usize,
}

/// Fetch the full library and reconcile the catalog table with it.
pub fn sync_catalog(db: &Database, source: &dyn CatalogSource) -> Result<CatalogSyncResult> {
    let items = source.fetch_items()?;

    let missing_runtimes = items.iter().filter(|i| i.runtime_seconds().is_none()).count();
    if missing_runtimes > 0 {
        tracing::debug!(
            items = missing_runtimes,
            "Library items without a usable runtime; sessions for them will classify via fallbacks"
        );
    }

    let upserted = db.upsert_catalog_items(&items)?;

    let current_ids: HashSet<String> = items.into_iter().map(|i| i.item_id).collect();
    let pruned = db.prune_missing_catalog_items(&current_ids)?;

    tracing::info!(upserted, pruned, "Catalog synced");
    Ok(CatalogSyncResult { upserted, pruned })
}
