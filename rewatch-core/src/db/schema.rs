//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! The three engine-owned tables (raw events, sessions, user-item stats) are
//! dropped and recreated on every refresh run, so their DDL is exposed as
//! statements the rebuild phases reuse inside their own transactions.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Library catalog. Referenced by the engine, written by the catalog sync.
pub const CREATE_LIBRARY_ITEMS: &str = r#"
    CREATE TABLE IF NOT EXISTS library_items (
        item_id          TEXT PRIMARY KEY,
        item_name        TEXT NOT NULL,
        item_kind        TEXT NOT NULL,

        -- Episode lineage
        series_name      TEXT,
        series_id        TEXT,
        season_number    INTEGER,
        episode_number   INTEGER,

        -- Runtime in media-server ticks (10,000,000 = 1 second)
        runtime_ticks    BIGINT,
        runtime_seconds  INTEGER GENERATED ALWAYS AS (runtime_ticks / 10000000),

        premiere_date    TEXT,
        production_year  INTEGER,
        community_rating REAL,

        last_updated_at  TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_library_kind ON library_items(item_kind);
    CREATE INDEX IF NOT EXISTS idx_library_series
        ON library_items(series_id, season_number, episode_number);
"#;

/// Raw playback pings, verbatim from the event source after timezone
/// normalization. The UNIQUE constraint spans every stored column so
/// duplicate ping delivery dedupes under INSERT OR IGNORE; `remote_address`
/// stores '' instead of NULL to keep the tuple total.
pub const CREATE_RAW_EVENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS watch_raw_events (
        row_id         INTEGER PRIMARY KEY AUTOINCREMENT,
        date           TEXT NOT NULL,
        time           TEXT NOT NULL,
        user_id        TEXT NOT NULL,
        item_name      TEXT NOT NULL,
        item_id        TEXT NOT NULL,
        item_kind      TEXT NOT NULL,
        duration_secs  INTEGER NOT NULL,
        remote_address TEXT NOT NULL DEFAULT '',
        user_name      TEXT NOT NULL,

        UNIQUE(date, time, user_id, item_name, item_id, item_kind,
               duration_secs, remote_address, user_name)
    );

    CREATE INDEX IF NOT EXISTS idx_raw_events_user_time
        ON watch_raw_events(user_id, date, time DESC);
    CREATE INDEX IF NOT EXISTS idx_raw_events_grouping
        ON watch_raw_events(user_id, item_id, date, time);
"#;

/// Reconstructed viewing sessions. `completion_ratio` is the only column
/// mutated after insert (by the completion-ratio refresher).
pub const CREATE_SESSIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS watch_sessions (
        session_id            INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id               TEXT NOT NULL,
        item_id               TEXT NOT NULL,
        started_at            TEXT NOT NULL,
        ended_at              TEXT NOT NULL,
        span_minutes          INTEGER NOT NULL,
        total_seconds_watched INTEGER NOT NULL,
        event_count           INTEGER NOT NULL,
        completion_ratio      REAL,
        outcome               TEXT NOT NULL,
        created_at            TEXT DEFAULT CURRENT_TIMESTAMP,

        UNIQUE(user_id, item_id, started_at)
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_user_ended
        ON watch_sessions(user_id, ended_at DESC);
    CREATE INDEX IF NOT EXISTS idx_sessions_item ON watch_sessions(item_id);
"#;

/// Per-(user, item) lifetime statistics.
pub const CREATE_USER_ITEM_STATS: &str = r#"
    CREATE TABLE IF NOT EXISTS user_item_stats (
        stat_id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id               TEXT NOT NULL,
        item_id               TEXT NOT NULL,
        total_sessions        INTEGER NOT NULL DEFAULT 0,
        total_seconds_watched INTEGER NOT NULL DEFAULT 0,
        total_minutes_watched REAL GENERATED ALWAYS AS (total_seconds_watched / 60.0),
        best_completion_ratio    REAL,
        average_completion_ratio REAL,
        rewatch_count         INTEGER NOT NULL DEFAULT 0,
        first_watched_at      TEXT NOT NULL,
        last_watched_at       TEXT NOT NULL,
        -- calendar-day distance; date() truncation keeps the julian-day
        -- difference an exact whole number
        days_between_first_last INTEGER GENERATED ALWAYS AS (
            CAST(julianday(date(last_watched_at)) - julianday(date(first_watched_at)) AS INTEGER)
        ),
        adherence_score       REAL NOT NULL DEFAULT 0,
        completed_sessions    INTEGER NOT NULL DEFAULT 0,
        partial_sessions      INTEGER NOT NULL DEFAULT 0,
        sampled_sessions      INTEGER NOT NULL DEFAULT 0,
        abandoned_sessions    INTEGER NOT NULL DEFAULT 0,
        last_updated_at       TEXT DEFAULT CURRENT_TIMESTAMP,

        UNIQUE(user_id, item_id)
    );

    CREATE INDEX IF NOT EXISTS idx_stats_user_adherence
        ON user_item_stats(user_id, adherence_score DESC);
"#;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&[&str]] = &[
    // Version 1: Initial schema
    &[
        CREATE_LIBRARY_ITEMS,
        CREATE_RAW_EVENTS,
        CREATE_SESSIONS,
        CREATE_USER_ITEM_STATS,
    ],
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            for statement in *migration {
                conn.execute_batch(statement)?;
            }
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

/// Drop and recreate the raw-events table (run inside a rebuild transaction).
pub fn recreate_raw_events(conn: &Connection) -> crate::error::Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS watch_raw_events")?;
    conn.execute_batch(CREATE_RAW_EVENTS)?;
    Ok(())
}

/// Drop and recreate the sessions table (run inside a rebuild transaction).
pub fn recreate_sessions(conn: &Connection) -> crate::error::Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS watch_sessions")?;
    conn.execute_batch(CREATE_SESSIONS)?;
    Ok(())
}

/// Drop and recreate the stats table (run inside a rebuild transaction).
pub fn recreate_user_item_stats(conn: &Connection) -> crate::error::Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS user_item_stats")?;
    conn.execute_batch(CREATE_USER_ITEM_STATS)?;
    Ok(())
}
