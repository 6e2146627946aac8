//! The watch-behavior refresh engine
//!
//! Turns raw playback pings into durable facts in four phases:
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌────────────────┐    ┌──────────────────┐
//! │ Event source │ ─► │ watch_raw_     │ ─► │ watch_sessions │ ─► │ user_item_stats  │
//! │ (media API)  │    │ events         │    │ (gap-segmented)│    │ (adherence, ...) │
//! └──────────────┘    └────────────────┘    └────────────────┘    └──────────────────┘
//!                                                  ▲
//!                            completion-ratio refresher (after catalog sync)
//! ```
//!
//! Each rebuild phase is one transaction: drop, recreate, repopulate, commit.
//! An error rolls the phase back and leaves the previous table contents in
//! place, so a failed run is simply re-run from scratch. The engine is
//! single-threaded and assumes exclusive write access for the duration of a
//! run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rewatch_core::{Config, Database, RefreshCoordinator};
//!
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//!
//! let coordinator = RefreshCoordinator::new(db, config.engine.clone());
//! let summary = coordinator.run_full(&source, config.server.lookback_days)?;
//! println!("{} sessions from {} events", summary.sessions_built, summary.events_inserted);
//! ```

pub mod classify;

mod completion;
mod ingest;
mod sessions;
mod stats;

pub use ingest::IngestStats;
pub use sessions::SessionBuildStats;

use crate::config::EngineConfig;
use crate::db::{Database, DATETIME_FORMAT};
use crate::error::{Error, Result};
use crate::source::EventSource;
use crate::types::Outcome;
use chrono::NaiveDateTime;

/// Session counts per outcome value.
#[derive(Debug, Clone, Default)]
pub struct OutcomeTally {
    pub completed: usize,
    pub partial: usize,
    pub sampled: usize,
    pub abandoned: usize,
    pub unknown: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Partial => self.partial += 1,
            Outcome::Sampled => self.sampled += 1,
            Outcome::Abandoned => self.abandoned += 1,
            Outcome::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.partial + self.sampled + self.abandoned + self.unknown
    }
}

/// Result of a full refresh run.
#[derive(Debug, Default)]
pub struct RefreshSummary {
    /// Events returned by the source
    pub events_fetched: usize,
    /// Raw-event rows inserted
    pub events_inserted: usize,
    /// Duplicate deliveries ignored
    pub duplicate_events: usize,
    /// Events corrected across the timezone cutover
    pub events_shifted: usize,
    /// Sessions reconstructed
    pub sessions_built: usize,
    /// Sessions classified without a catalog runtime
    pub fallback_sessions: usize,
    /// Session counts per outcome
    pub outcomes: OutcomeTally,
    /// User-item stat rows written
    pub stat_rows: usize,
    /// Session ratios revised by the refresher
    pub ratios_refreshed: usize,
}

/// Coordinates the refresh phases against one database.
///
/// Owns the store handle and the engine constants; each phase method wraps
/// its work in a scoped transaction so rollback happens on every exit path.
pub struct RefreshCoordinator {
    db: Database,
    config: EngineConfig,
}

impl RefreshCoordinator {
    /// Create a coordinator over an open, migrated database.
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Read access to the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Phase 1: rebuild the raw-event store from the event source,
    /// normalizing timestamps across the timezone cutover.
    pub fn rebuild_raw_events(
        &self,
        source: &dyn EventSource,
        lookback_days: u32,
    ) -> Result<IngestStats> {
        ingest::rebuild_raw_events(&self.db, &self.config, source, lookback_days)
    }

    /// Phase 2: reconstruct gap-segmented sessions from the raw events.
    pub fn rebuild_sessions(&self) -> Result<SessionBuildStats> {
        sessions::rebuild_sessions(&self.db, &self.config)
    }

    /// Phase 3: roll sessions up into one stat row per (user, item).
    pub fn rebuild_user_item_stats(&self) -> Result<usize> {
        stats::rebuild_user_item_stats(&self.db, &self.config)
    }

    /// Phase 4: backfill session completion ratios from catalog runtimes.
    /// Idempotent; run after the catalog is populated.
    pub fn refresh_completion_ratios(&self) -> Result<usize> {
        completion::refresh_completion_ratios(&self.db)
    }

    /// Run all four phases in order.
    pub fn run_full(&self, source: &dyn EventSource, lookback_days: u32) -> Result<RefreshSummary> {
        let ingest = self.rebuild_raw_events(source, lookback_days)?;
        let sessions = self.rebuild_sessions()?;
        let stat_rows = self.rebuild_user_item_stats()?;
        let ratios_refreshed = self.refresh_completion_ratios()?;

        Ok(RefreshSummary {
            events_fetched: ingest.fetched,
            events_inserted: ingest.inserted,
            duplicate_events: ingest.duplicates,
            events_shifted: ingest.shifted,
            sessions_built: sessions.built,
            fallback_sessions: sessions.fallback_sessions,
            outcomes: sessions.outcomes,
            stat_rows,
            ratios_refreshed,
        })
    }
}

/// Parse a timestamp previously written by the engine.
pub(crate) fn parse_stored_ts(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|e| {
        Error::Database(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_tally() {
        let mut tally = OutcomeTally::default();
        tally.record(Outcome::Completed);
        tally.record(Outcome::Completed);
        tally.record(Outcome::Abandoned);

        assert_eq!(tally.completed, 2);
        assert_eq!(tally.abandoned, 1);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn test_parse_stored_ts() {
        assert!(parse_stored_ts("2025-08-20 21:00:00").is_ok());
        assert!(parse_stored_ts("2025-08-20T21:00:00Z").is_err());
    }
}
