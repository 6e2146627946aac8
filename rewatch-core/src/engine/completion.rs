//! Completion-ratio refresher
//!
//! Catalog metadata often lands after sessions are first built, so their
//! completion ratios start from fallback divisors. This pass revises the
//! ratio in place for every session whose item now has a positive runtime,
//! leaving the rest untouched. Safe to run repeatedly.

use crate::db::Database;
use crate::error::Result;

/// Backfill completion ratios from catalog runtimes.
///
/// Returns the number of sessions revised.
pub(crate) fn refresh_completion_ratios(db: &Database) -> Result<usize> {
    let conn = db.connection();

    // SQLite has no UPDATE ... FROM; correlated subqueries instead.
    let updated = conn.execute(
        r#"
        UPDATE watch_sessions
        SET completion_ratio = MIN(
            1.0,
            CAST(total_seconds_watched AS REAL) / (
                SELECT runtime_seconds
                FROM library_items l
                WHERE l.item_id = watch_sessions.item_id
            )
        )
        WHERE EXISTS (
            SELECT 1 FROM library_items l
            WHERE l.item_id = watch_sessions.item_id
            AND l.runtime_seconds > 0
        )
        "#,
        [],
    )?;

    tracing::info!(sessions = updated, "Completion ratios refreshed");
    Ok(updated)
}
