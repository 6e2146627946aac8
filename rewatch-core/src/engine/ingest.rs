//! Raw event ingestion and timezone correction
//!
//! Pulls the full watch history from the event source, normalizes timestamps
//! across the recorder's timezone cutover, and rebuilds the raw-events table
//! in one transaction. A malformed event (uncoercible duration, bad date or
//! time) fails the whole run with the offending user named; partial loads
//! never become visible.

use crate::config::EngineConfig;
use crate::db::{schema, Database};
use crate::error::{Error, Result};
use crate::source::EventSource;
use crate::types::{ItemKind, PlaybackEvent, RawEvent};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection};

/// Counters from a raw-event rebuild.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Events returned by the source
    pub fetched: usize,
    /// Rows actually inserted
    pub inserted: usize,
    /// Duplicate deliveries silently ignored
    pub duplicates: usize,
    /// Events shifted by the timezone correction
    pub shifted: usize,
}

/// Rebuild the raw-events table from the event source.
pub(crate) fn rebuild_raw_events(
    db: &Database,
    config: &EngineConfig,
    source: &dyn EventSource,
    lookback_days: u32,
) -> Result<IngestStats> {
    let cutover = config.cutover()?;
    let shift = Duration::hours(config.timezone_shift_hours);

    let history = source.fetch_all_watch_history(lookback_days, false)?;

    // Normalize everything up front so a malformed event aborts before the
    // old table is touched.
    let mut rows = Vec::new();
    let mut shifted = 0usize;
    for (user_name, events) in &history {
        for event in events {
            let (row, was_shifted) = normalize_event(user_name, event, cutover, shift)?;
            if was_shifted {
                shifted += 1;
            }
            rows.push(row);
        }
        tracing::debug!(user = %user_name, events = events.len(), "Fetched watch history");
    }

    let fetched = rows.len();

    let mut conn = db.connection();

    // The table is fully rebuilt every run and is not a source of truth
    // between runs, so relax durability for the bulk load.
    conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;")?;

    let insert_result = insert_all(&mut conn, &rows);

    // Restore durable settings whether or not the load succeeded
    conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA journal_mode = WAL;")?;

    let inserted = insert_result?;
    let duplicates = fetched - inserted;

    tracing::info!(fetched, inserted, duplicates, shifted, "Raw events rebuilt");

    Ok(IngestStats {
        fetched,
        inserted,
        duplicates,
        shifted,
    })
}

/// Drop, recreate, and bulk-populate the table in one transaction.
fn insert_all(conn: &mut Connection, rows: &[RawEvent]) -> Result<usize> {
    let tx = conn.transaction()?;
    schema::recreate_raw_events(&tx)?;

    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO watch_raw_events
             (date, time, user_id, item_name, item_id, item_kind,
              duration_secs, remote_address, user_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for row in rows {
            inserted += stmt.execute(params![
                row.date.format("%Y-%m-%d").to_string(),
                row.time.format("%H:%M:%S").to_string(),
                row.user_id,
                row.item_name,
                row.item_id,
                row.item_kind.as_str(),
                row.duration_secs,
                row.remote_address.as_deref().unwrap_or(""),
                row.user_name,
            ])?;
        }
    }

    tx.commit()?;
    Ok(inserted)
}

/// Validate one wire event and apply the timezone correction.
///
/// Returns the normalized event and whether it was shifted.
fn normalize_event(
    user: &str,
    event: &PlaybackEvent,
    cutover: NaiveDateTime,
    shift: Duration,
) -> Result<(RawEvent, bool)> {
    let date = NaiveDate::parse_from_str(&event.date, "%Y-%m-%d").map_err(|e| Error::Ingest {
        user: user.to_string(),
        detail: format!(
            "bad date {:?} for item {}: {}",
            event.date, event.item_id, e
        ),
    })?;
    let time = NaiveTime::parse_from_str(&event.time, "%H:%M:%S").map_err(|e| Error::Ingest {
        user: user.to_string(),
        detail: format!(
            "bad time {:?} for item {}: {}",
            event.time, event.item_id, e
        ),
    })?;

    let duration_secs: i64 = event.duration.trim().parse().map_err(|_| Error::Ingest {
        user: user.to_string(),
        detail: format!(
            "duration {:?} for item {} is not an integer",
            event.duration, event.item_id
        ),
    })?;
    if duration_secs < 0 {
        return Err(Error::Ingest {
            user: user.to_string(),
            detail: format!(
                "duration {} for item {} is negative",
                duration_secs, event.item_id
            ),
        });
    }

    // Events recorded before the cutover carry the recorder's old timezone
    // offset; shift them onto the canonical zone.
    let mut timestamp = date.and_time(time);
    let was_shifted = timestamp < cutover;
    if was_shifted {
        timestamp += shift;
    }

    Ok((
        RawEvent {
            date: timestamp.date(),
            time: timestamp.time(),
            user_id: event.user_id.clone(),
            item_name: event.item_name.clone(),
            item_id: event.item_id.clone(),
            item_kind: ItemKind::from_source(&event.item_type),
            duration_secs,
            remote_address: event.remote_address.clone().filter(|a| !a.is_empty()),
            user_name: event.user_name.clone(),
        },
        was_shifted,
    ))
}
