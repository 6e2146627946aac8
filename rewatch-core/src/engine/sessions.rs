//! Session reconstruction
//!
//! One ordered scan over the raw-events table, folded into gap-segmented
//! sessions per (user, item) pair: a gap above the configured threshold
//! between consecutive pings starts a new session, anything at or below it
//! extends the current one. Sessions bulk-insert inside the same transaction
//! that dropped and recreated the table, so a failed rebuild leaves the
//! previous rows untouched.

use crate::config::EngineConfig;
use crate::db::{format_datetime, schema, Database};
use crate::error::Result;
use crate::types::{ItemKind, ItemRuntime};
use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, Statement};
use std::collections::HashMap;

use super::classify::classify;
use super::{parse_stored_ts, OutcomeTally};

/// Counters from a session rebuild.
#[derive(Debug, Clone, Default)]
pub struct SessionBuildStats {
    /// Sessions written
    pub built: usize,
    /// Sessions classified under the fallback (runtime unknown) regime
    pub fallback_sessions: usize,
    /// Session counts per outcome
    pub outcomes: OutcomeTally,
}

/// A session being accumulated during the fold.
struct OpenSession {
    user_id: String,
    item_id: String,
    item_kind: ItemKind,
    started_at: NaiveDateTime,
    last_seen: NaiveDateTime,
    total_seconds: i64,
    event_count: i64,
}

impl OpenSession {
    fn start(
        user_id: String,
        item_id: String,
        item_kind: ItemKind,
        ts: NaiveDateTime,
        duration_secs: i64,
    ) -> Self {
        Self {
            user_id,
            item_id,
            item_kind,
            started_at: ts,
            last_seen: ts,
            total_seconds: duration_secs,
            event_count: 1,
        }
    }

    /// Whether an event belongs to this session: same pair, gap within bounds.
    fn accepts(&self, user_id: &str, item_id: &str, ts: NaiveDateTime, gap: Duration) -> bool {
        self.user_id == user_id && self.item_id == item_id && ts - self.last_seen <= gap
    }

    fn absorb(&mut self, ts: NaiveDateTime, duration_secs: i64) {
        self.last_seen = ts;
        self.total_seconds += duration_secs;
        self.event_count += 1;
    }
}

/// Rebuild the sessions table from the full raw-event set.
pub(crate) fn rebuild_sessions(db: &Database, config: &EngineConfig) -> Result<SessionBuildStats> {
    let runtimes = db.load_runtime_map()?;
    let gap = Duration::minutes(config.session_gap_minutes);

    let mut conn = db.connection();
    let tx = conn.transaction()?;
    schema::recreate_sessions(&tx)?;

    let mut stats = SessionBuildStats::default();
    {
        let mut read = tx.prepare(
            "SELECT user_id, item_id, item_kind, date || ' ' || time AS event_ts, duration_secs
             FROM watch_raw_events
             ORDER BY user_id, item_id, date, time",
        )?;
        let mut insert = tx.prepare(
            "INSERT INTO watch_sessions
             (user_id, item_id, started_at, ended_at, span_minutes,
              total_seconds_watched, event_count, completion_ratio, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;

        let mut rows = read.query([])?;
        let mut current: Option<OpenSession> = None;

        while let Some(row) = rows.next()? {
            let user_id: String = row.get(0)?;
            let item_id: String = row.get(1)?;
            let kind_str: String = row.get(2)?;
            let ts_str: String = row.get(3)?;
            let duration_secs: i64 = row.get(4)?;

            let ts = parse_stored_ts(&ts_str)?;
            let extends = matches!(&current,
                Some(open) if open.accepts(&user_id, &item_id, ts, gap));

            if extends {
                if let Some(open) = current.as_mut() {
                    open.absorb(ts, duration_secs);
                }
            } else {
                if let Some(done) = current.take() {
                    flush(done, &runtimes, config, &mut insert, &mut stats)?;
                }
                let item_kind = kind_str.parse::<ItemKind>().unwrap_or(ItemKind::Other);
                current = Some(OpenSession::start(
                    user_id,
                    item_id,
                    item_kind,
                    ts,
                    duration_secs,
                ));
            }
        }

        if let Some(done) = current.take() {
            flush(done, &runtimes, config, &mut insert, &mut stats)?;
        }
    }

    tx.commit()?;

    tracing::info!(
        sessions = stats.built,
        fallback = stats.fallback_sessions,
        completed = stats.outcomes.completed,
        partial = stats.outcomes.partial,
        sampled = stats.outcomes.sampled,
        abandoned = stats.outcomes.abandoned,
        unknown = stats.outcomes.unknown,
        "Sessions rebuilt"
    );

    Ok(stats)
}

/// Classify a finished session and insert it.
fn flush(
    open: OpenSession,
    runtimes: &HashMap<String, i64>,
    config: &EngineConfig,
    insert: &mut Statement<'_>,
    stats: &mut SessionBuildStats,
) -> Result<()> {
    let runtime = ItemRuntime::resolve(runtimes.get(&open.item_id).copied(), open.item_kind);
    if runtime.is_fallback() {
        stats.fallback_sessions += 1;
        tracing::debug!(
            item_id = %open.item_id,
            kind = %open.item_kind,
            "No catalog runtime; classifying session with fallback thresholds"
        );
    }

    let (ratio, outcome) = classify(open.total_seconds, &runtime, config);
    let span_minutes = (open.last_seen - open.started_at).num_minutes();

    insert.execute(params![
        open.user_id,
        open.item_id,
        format_datetime(open.started_at),
        format_datetime(open.last_seen),
        span_minutes,
        open.total_seconds,
        open.event_count,
        ratio,
        outcome.as_str(),
    ])?;

    stats.built += 1;
    stats.outcomes.record(outcome);
    Ok(())
}
