//! User-item statistics aggregation
//!
//! One pass over the full session set grouped by (user, item): totals,
//! best/average completion, rewatch count, first/last watch, per-outcome
//! tallies, and the adherence score. Drop + recreate + insert in one
//! transaction, like the other rebuild phases.

use crate::config::EngineConfig;
use crate::db::{format_datetime, schema, Database};
use crate::error::Result;
use crate::types::{ItemKind, ItemRuntime, Outcome};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Statement};
use std::collections::HashMap;

use super::classify::completion_ratio;
use super::{parse_stored_ts, OutcomeTally};

/// All sessions of one (user, item) pair, folded.
struct PairAccum {
    user_id: String,
    item_id: String,
    sessions: i64,
    total_seconds: i64,
    max_session_seconds: i64,
    first_started: NaiveDateTime,
    last_ended: NaiveDateTime,
    outcomes: OutcomeTally,
}

impl PairAccum {
    fn start(
        user_id: String,
        item_id: String,
        started: NaiveDateTime,
        ended: NaiveDateTime,
        seconds: i64,
        outcome: Outcome,
    ) -> Self {
        let mut outcomes = OutcomeTally::default();
        outcomes.record(outcome);
        Self {
            user_id,
            item_id,
            sessions: 1,
            total_seconds: seconds,
            max_session_seconds: seconds,
            first_started: started,
            last_ended: ended,
            outcomes,
        }
    }

    fn absorb(&mut self, started: NaiveDateTime, ended: NaiveDateTime, seconds: i64, outcome: Outcome) {
        self.sessions += 1;
        self.total_seconds += seconds;
        self.max_session_seconds = self.max_session_seconds.max(seconds);
        self.first_started = self.first_started.min(started);
        self.last_ended = self.last_ended.max(ended);
        self.outcomes.record(outcome);
    }
}

/// Rebuild the user-item stats table from the full session set.
///
/// Returns the number of stat rows written.
pub(crate) fn rebuild_user_item_stats(db: &Database, config: &EngineConfig) -> Result<usize> {
    let runtimes = db.load_runtime_map()?;

    let mut conn = db.connection();
    let tx = conn.transaction()?;
    schema::recreate_user_item_stats(&tx)?;

    // Sessions do not carry the item kind; the raw events that produced them
    // do, and every session item necessarily appears there.
    let kinds = load_kind_map(&tx)?;

    let mut rows_written = 0usize;
    {
        let mut read = tx.prepare(
            "SELECT user_id, item_id, started_at, ended_at, total_seconds_watched, outcome
             FROM watch_sessions
             ORDER BY user_id, item_id, started_at",
        )?;
        let mut insert = tx.prepare(
            "INSERT INTO user_item_stats
             (user_id, item_id, total_sessions, total_seconds_watched,
              best_completion_ratio, average_completion_ratio, rewatch_count,
              first_watched_at, last_watched_at, adherence_score,
              completed_sessions, partial_sessions, sampled_sessions, abandoned_sessions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;

        let mut rows = read.query([])?;
        let mut current: Option<PairAccum> = None;

        while let Some(row) = rows.next()? {
            let user_id: String = row.get(0)?;
            let item_id: String = row.get(1)?;
            let started = parse_stored_ts(&row.get::<_, String>(2)?)?;
            let ended = parse_stored_ts(&row.get::<_, String>(3)?)?;
            let seconds: i64 = row.get(4)?;
            let outcome = row
                .get::<_, String>(5)?
                .parse::<Outcome>()
                .unwrap_or(Outcome::Unknown);

            let same_pair = matches!(&current,
                Some(acc) if acc.user_id == user_id && acc.item_id == item_id);

            if same_pair {
                if let Some(acc) = current.as_mut() {
                    acc.absorb(started, ended, seconds, outcome);
                }
            } else {
                if let Some(done) = current.take() {
                    flush_pair(done, &kinds, &runtimes, config, &mut insert)?;
                    rows_written += 1;
                }
                current = Some(PairAccum::start(
                    user_id, item_id, started, ended, seconds, outcome,
                ));
            }
        }

        if let Some(done) = current.take() {
            flush_pair(done, &kinds, &runtimes, config, &mut insert)?;
            rows_written += 1;
        }
    }

    tx.commit()?;

    tracing::info!(rows = rows_written, "User-item statistics rebuilt");
    Ok(rows_written)
}

/// item_id -> kind, sourced from the raw events.
fn load_kind_map(conn: &Connection) -> Result<HashMap<String, ItemKind>> {
    let mut stmt =
        conn.prepare("SELECT item_id, MAX(item_kind) FROM watch_raw_events GROUP BY item_id")?;
    let mut map = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (id, kind_str) = row?;
        map.insert(id, kind_str.parse::<ItemKind>().unwrap_or(ItemKind::Other));
    }
    Ok(map)
}

/// Compute derived fields for a finished pair and insert its stat row.
fn flush_pair(
    acc: PairAccum,
    kinds: &HashMap<String, ItemKind>,
    runtimes: &HashMap<String, i64>,
    config: &EngineConfig,
    insert: &mut Statement<'_>,
) -> Result<()> {
    let kind = kinds.get(&acc.item_id).copied().unwrap_or(ItemKind::Other);
    let runtime = ItemRuntime::resolve(runtimes.get(&acc.item_id).copied(), kind);
    if runtime.is_fallback() {
        tracing::debug!(
            item_id = %acc.item_id,
            kind = %kind,
            "No catalog runtime; computing stats with fallback constants"
        );
    }

    // Best and average apply the session ratio formula to the max/mean of
    // per-session watched seconds.
    let best = completion_ratio(acc.max_session_seconds as f64, &runtime, config);
    let mean_seconds = acc.total_seconds as f64 / acc.sessions as f64;
    let average = completion_ratio(mean_seconds, &runtime, config);

    let rewatch_count = (acc.sessions - 1).max(0);
    let adherence = adherence_score(kind, &runtime, best, acc.sessions, acc.total_seconds, config);

    insert.execute(params![
        acc.user_id,
        acc.item_id,
        acc.sessions,
        acc.total_seconds,
        best,
        average,
        rewatch_count,
        format_datetime(acc.first_started),
        format_datetime(acc.last_ended),
        adherence,
        acc.outcomes.completed as i64,
        acc.outcomes.partial as i64,
        acc.outcomes.sampled as i64,
        acc.outcomes.abandoned as i64,
    ])?;

    Ok(())
}

/// Weighted engagement blend in [0, 1].
///
/// Per-kind weights apply whether or not the runtime is known; only the
/// cumulative-term divisor switches between the catalog runtime and the
/// kind's fallback. Kinds without a profile score 0.
pub(crate) fn adherence_score(
    kind: ItemKind,
    runtime: &ItemRuntime,
    best_ratio: Option<f64>,
    session_count: i64,
    total_seconds: i64,
    config: &EngineConfig,
) -> f64 {
    let Some(profile) = config.profile_for(kind) else {
        return 0.0;
    };
    let weights = &profile.adherence;

    let best = best_ratio.unwrap_or(0.0);
    let repeat = (session_count as f64 / weights.repeat_cap).min(1.0);
    let divisor = match runtime {
        ItemRuntime::Known(rt) => *rt as f64,
        ItemRuntime::Unknown(_) => weights.cumulative_fallback_secs as f64,
    };
    let cumulative = (total_seconds as f64 / divisor).min(1.0);

    weights.best_weight * best + weights.repeat_weight * repeat + weights.cumulative_weight * cumulative
}
