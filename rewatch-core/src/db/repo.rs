//! Database repository layer
//!
//! Provides the store handle, catalog operations, and the read-side queries
//! downstream consumers (CLI, tests, analytics notebooks) use. The rebuild
//! phases in [`crate::engine`] open their own transactions on this handle.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Storage format for timestamps; sortable and understood by SQLite's
/// date functions (julianday in the generated columns).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp for storage.
pub fn format_datetime(ts: NaiveDateTime) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

fn parse_datetime(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for durability between batch runs; the engine relaxes these
        // pragmas itself during bulk loads.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Catalog operations
    // ============================================

    /// Insert or update a single catalog item
    pub fn upsert_catalog_item(&self, item: &CatalogItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_catalog_item_on(&conn, item)
    }

    fn upsert_catalog_item_on(conn: &Connection, item: &CatalogItem) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO library_items (item_id, item_name, item_kind, series_name, series_id,
                                       season_number, episode_number, runtime_ticks,
                                       premiere_date, production_year, community_rating,
                                       last_updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP)
            ON CONFLICT(item_id) DO UPDATE SET
                item_name = excluded.item_name,
                item_kind = excluded.item_kind,
                series_name = excluded.series_name,
                series_id = excluded.series_id,
                season_number = excluded.season_number,
                episode_number = excluded.episode_number,
                runtime_ticks = excluded.runtime_ticks,
                premiere_date = excluded.premiere_date,
                production_year = excluded.production_year,
                community_rating = excluded.community_rating,
                last_updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                item.item_id,
                item.item_name,
                item.item_kind.as_str(),
                item.series_name,
                item.series_id,
                item.season_number,
                item.episode_number,
                item.runtime_ticks,
                item.premiere_date,
                item.production_year,
                item.community_rating,
            ],
        )?;
        Ok(())
    }

    /// Upsert a batch of catalog items inside one transaction
    pub fn upsert_catalog_items(&self, items: &[CatalogItem]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for item in items {
            Self::upsert_catalog_item_on(&tx, item)?;
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// Delete catalog rows whose ids are no longer present in the library.
    /// Returns the number of rows deleted.
    pub fn prune_missing_catalog_items(&self, current_ids: &HashSet<String>) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT item_id FROM library_items")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };

        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM library_items WHERE item_id = ?")?;
            for id in existing {
                if !current_ids.contains(&id) {
                    deleted += stmt.execute([&id])?;
                }
            }
        }

        tx.commit()?;
        Ok(deleted)
    }

    /// Get a catalog item by id
    pub fn get_catalog_item(&self, item_id: &str) -> Result<Option<CatalogItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT item_id, item_name, item_kind, series_name, series_id, season_number,
                    episode_number, runtime_ticks, premiere_date, production_year,
                    community_rating
             FROM library_items WHERE item_id = ?",
            [item_id],
            Self::row_to_catalog_item,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Load item_id -> runtime_seconds for every item with a positive runtime.
    ///
    /// One map load per rebuild phase instead of a correlated lookup per row.
    pub fn load_runtime_map(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT item_id, runtime_seconds FROM library_items WHERE runtime_seconds > 0",
        )?;
        let mut map = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (id, runtime) = row?;
            map.insert(id, runtime);
        }
        Ok(map)
    }

    /// Number of catalog rows
    pub fn count_catalog_items(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM library_items", [], |r| r.get(0))?;
        Ok(count)
    }

    fn row_to_catalog_item(row: &Row) -> rusqlite::Result<CatalogItem> {
        let kind_str: String = row.get("item_kind")?;
        let item_kind = kind_str
            .parse::<ItemKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into()))?;

        Ok(CatalogItem {
            item_id: row.get("item_id")?,
            item_name: row.get("item_name")?,
            item_kind,
            series_name: row.get("series_name")?,
            series_id: row.get("series_id")?,
            season_number: row.get("season_number")?,
            episode_number: row.get("episode_number")?,
            runtime_ticks: row.get("runtime_ticks")?,
            premiere_date: row.get("premiere_date")?,
            production_year: row.get("production_year")?,
            community_rating: row.get("community_rating")?,
        })
    }

    // ============================================
    // Raw event queries
    // ============================================

    /// Number of stored raw events
    pub fn count_raw_events(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM watch_raw_events", [], |r| r.get(0))?;
        Ok(count)
    }

    /// All raw events for one (user, item) pair in timestamp order
    pub fn raw_events_for_pair(&self, user_id: &str, item_id: &str) -> Result<Vec<RawEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, time, user_id, item_name, item_id, item_kind, duration_secs,
                    remote_address, user_name
             FROM watch_raw_events
             WHERE user_id = ?1 AND item_id = ?2
             ORDER BY date, time",
        )?;
        let rows = stmt.query_map(params![user_id, item_id], Self::row_to_raw_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn row_to_raw_event(row: &Row) -> rusqlite::Result<RawEvent> {
        let date_str: String = row.get("date")?;
        let time_str: String = row.get("time")?;
        let kind_str: String = row.get("item_kind")?;
        let remote: String = row.get("remote_address")?;

        let date = chrono::NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let time = chrono::NaiveTime::parse_from_str(&time_str, "%H:%M:%S").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let item_kind = kind_str
            .parse::<ItemKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into()))?;

        Ok(RawEvent {
            date,
            time,
            user_id: row.get("user_id")?,
            item_name: row.get("item_name")?,
            item_id: row.get("item_id")?,
            item_kind,
            duration_secs: row.get("duration_secs")?,
            remote_address: if remote.is_empty() { None } else { Some(remote) },
            user_name: row.get("user_name")?,
        })
    }

    // ============================================
    // Session queries
    // ============================================

    /// Number of stored sessions
    pub fn count_sessions(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM watch_sessions", [], |r| r.get(0))?;
        Ok(count)
    }

    /// All sessions, ordered by user, item, start time
    pub fn all_sessions(&self) -> Result<Vec<WatchSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, user_id, item_id, started_at, ended_at, span_minutes,
                    total_seconds_watched, event_count, completion_ratio, outcome
             FROM watch_sessions
             ORDER BY user_id, item_id, started_at",
        )?;
        let rows = stmt.query_map([], Self::row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Sessions for one (user, item) pair, ordered by start time
    pub fn sessions_for_pair(&self, user_id: &str, item_id: &str) -> Result<Vec<WatchSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, user_id, item_id, started_at, ended_at, span_minutes,
                    total_seconds_watched, event_count, completion_ratio, outcome
             FROM watch_sessions
             WHERE user_id = ?1 AND item_id = ?2
             ORDER BY started_at",
        )?;
        let rows = stmt.query_map(params![user_id, item_id], Self::row_to_session)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<WatchSession> {
        let started_str: String = row.get("started_at")?;
        let ended_str: String = row.get("ended_at")?;
        let outcome_str: String = row.get("outcome")?;

        let outcome = outcome_str
            .parse::<Outcome>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into()))?;

        Ok(WatchSession {
            session_id: row.get("session_id")?,
            user_id: row.get("user_id")?,
            item_id: row.get("item_id")?,
            started_at: parse_datetime(3, &started_str)?,
            ended_at: parse_datetime(4, &ended_str)?,
            span_minutes: row.get("span_minutes")?,
            total_seconds_watched: row.get("total_seconds_watched")?,
            event_count: row.get("event_count")?,
            completion_ratio: row.get("completion_ratio")?,
            outcome,
        })
    }

    // ============================================
    // User-item stat queries
    // ============================================

    /// Number of stat rows
    pub fn count_user_item_stats(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM user_item_stats", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Get the stat row for one (user, item) pair
    pub fn get_user_item_stat(&self, user_id: &str, item_id: &str) -> Result<Option<UserItemStat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE user_id = ?1 AND item_id = ?2", STAT_SELECT),
            params![user_id, item_id],
            Self::row_to_stat,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Highest-adherence rows across all users, for dashboards and the CLI
    pub fn top_stats_by_adherence(&self, limit: usize) -> Result<Vec<UserItemStat>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY adherence_score DESC, total_seconds_watched DESC LIMIT ?1",
            STAT_SELECT
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_stat)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn row_to_stat(row: &Row) -> rusqlite::Result<UserItemStat> {
        let first_str: String = row.get("first_watched_at")?;
        let last_str: String = row.get("last_watched_at")?;

        Ok(UserItemStat {
            user_id: row.get("user_id")?,
            item_id: row.get("item_id")?,
            total_sessions: row.get("total_sessions")?,
            total_seconds_watched: row.get("total_seconds_watched")?,
            total_minutes_watched: row.get("total_minutes_watched")?,
            best_completion_ratio: row.get("best_completion_ratio")?,
            average_completion_ratio: row.get("average_completion_ratio")?,
            rewatch_count: row.get("rewatch_count")?,
            first_watched_at: parse_datetime(8, &first_str)?,
            last_watched_at: parse_datetime(9, &last_str)?,
            days_between_first_last: row.get("days_between_first_last")?,
            adherence_score: row.get("adherence_score")?,
            completed_sessions: row.get("completed_sessions")?,
            partial_sessions: row.get("partial_sessions")?,
            sampled_sessions: row.get("sampled_sessions")?,
            abandoned_sessions: row.get("abandoned_sessions")?,
        })
    }
}

const STAT_SELECT: &str = "SELECT user_id, item_id, total_sessions, total_seconds_watched,
        total_minutes_watched, best_completion_ratio, average_completion_ratio, rewatch_count,
        first_watched_at, last_watched_at, days_between_first_last, adherence_score,
        completed_sessions, partial_sessions, sampled_sessions, abandoned_sessions
 FROM user_item_stats";

/// Copy the database file to `<backup_dir>/<name>_<date>.backup` before a
/// destructive full refresh. Returns the backup path.
pub fn backup_database(db_path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    if !db_path.exists() {
        return Err(Error::Config(format!(
            "database not found at {}",
            db_path.display()
        )));
    }

    std::fs::create_dir_all(backup_dir)?;

    let name = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("watch.db");
    let date = chrono::Local::now().format("%Y-%m-%d");
    let backup_path = backup_dir.join(format!("{}_{}.backup", name, date));

    std::fs::copy(db_path, &backup_path)?;
    tracing::info!(backup = %backup_path.display(), "Database backed up");

    Ok(backup_path)
}
