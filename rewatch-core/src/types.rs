//! Core domain types for rewatch
//!
//! These types represent the persisted data model: raw playback pings as
//! delivered by the media server, the viewing sessions reconstructed from
//! them, and the per-(user, item) lifetime statistics derived from sessions.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Ping** | One reported slice of playback time, not a full session |
//! | **Session** | A contiguous viewing interval inferred by gap-clustering pings |
//! | **Outcome** | How much of an item a session represents (completed/partial/sampled/abandoned) |
//! | **Adherence score** | Weighted composite of a user's sustained engagement with an item |
//! | **Catalog runtime** | Canonical duration of an item, sourced from the library catalog |

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// ============================================
// Item kinds
// ============================================

/// Kind of media item a ping or catalog entry refers to.
///
/// The media server reports "Episode" and "Movie"; everything else (trailers,
/// music videos, home media) collapses into [`ItemKind::Other`], which has no
/// fallback runtime and classifies as [`Outcome::Unknown`] when the catalog
/// runtime is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Episode,
    Movie,
    Other,
}

impl ItemKind {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Episode => "episode",
            ItemKind::Movie => "movie",
            ItemKind::Other => "other",
        }
    }

    /// Map the media server's item-type string ("Episode", "Movie", ...).
    ///
    /// Unrecognized kinds are data, not errors; they become [`ItemKind::Other`].
    pub fn from_source(s: &str) -> Self {
        match s {
            "Episode" | "episode" => ItemKind::Episode,
            "Movie" | "movie" => ItemKind::Movie,
            _ => ItemKind::Other,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episode" => Ok(ItemKind::Episode),
            "movie" => Ok(ItemKind::Movie),
            "other" => Ok(ItemKind::Other),
            _ => Err(format!("unknown item kind: {}", s)),
        }
    }
}

// ============================================
// Session outcome
// ============================================

/// Categorical classification of how much of an item a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Watched (nearly) the whole item
    Completed,
    /// Watched a meaningful fraction
    Partial,
    /// Watched long enough to count as a deliberate look
    Sampled,
    /// Gave up almost immediately
    Abandoned,
    /// Kind unrecognized and runtime unknown; nothing to classify against
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Partial => "partial",
            Outcome::Sampled => "sampled",
            Outcome::Abandoned => "abandoned",
            Outcome::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "partial" => Ok(Outcome::Partial),
            "sampled" => Ok(Outcome::Sampled),
            "abandoned" => Ok(Outcome::Abandoned),
            "unknown" => Ok(Outcome::Unknown),
            _ => Err(format!("unknown outcome: {}", s)),
        }
    }
}

// ============================================
// Runtime resolution
// ============================================

/// Which threshold regime applies to a session or stat row.
///
/// Classification must use exactly one regime: runtime-relative fractions when
/// the catalog knows the item's length, per-kind absolute seconds when it does
/// not. Modeling the decision as a sum type keeps the two regimes from ever
/// mixing inside the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRuntime {
    /// Canonical runtime in seconds (always positive)
    Known(i64),
    /// No usable runtime; fall back to kind-specific constants
    Unknown(ItemKind),
}

impl ItemRuntime {
    /// Resolve a catalog lookup result into a regime.
    ///
    /// Non-positive runtimes count as unknown.
    pub fn resolve(runtime_seconds: Option<i64>, kind: ItemKind) -> Self {
        match runtime_seconds {
            Some(rt) if rt > 0 => ItemRuntime::Known(rt),
            _ => ItemRuntime::Unknown(kind),
        }
    }

    /// True when this is the fallback regime
    pub fn is_fallback(&self) -> bool {
        matches!(self, ItemRuntime::Unknown(_))
    }
}

// ============================================
// Raw events
// ============================================

/// One playback ping, after timezone normalization.
///
/// Raw events carry no identity beyond their full value tuple; duplicate ping
/// delivery is deduplicated at insert time over all stored columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Calendar date in the canonical timezone
    pub date: NaiveDate,
    /// Time of day in the canonical timezone
    pub time: NaiveTime,
    /// Media-server user id
    pub user_id: String,
    /// Display name of the item at ping time
    pub item_name: String,
    /// Media-server item id
    pub item_id: String,
    /// Kind of item the ping refers to
    pub item_kind: ItemKind,
    /// Seconds of playback this ping reports (non-negative)
    pub duration_secs: i64,
    /// Network address of the playing device, when reported
    pub remote_address: Option<String>,
    /// User display name
    pub user_name: String,
}

impl RawEvent {
    /// Combined timestamp of this ping
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

// ============================================
// Sessions
// ============================================

/// A reconstructed, contiguous viewing interval for one (user, item) pair.
///
/// For a fixed pair, sessions are disjoint in time and every raw event of the
/// pair belongs to exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSession {
    /// Database id (autoincrement)
    pub session_id: i64,
    pub user_id: String,
    pub item_id: String,
    /// Earliest constituent event timestamp
    pub started_at: NaiveDateTime,
    /// Latest constituent event timestamp
    pub ended_at: NaiveDateTime,
    /// Whole minutes between start and end
    pub span_minutes: i64,
    /// Sum of constituent event durations
    pub total_seconds_watched: i64,
    /// Number of constituent events
    pub event_count: i64,
    /// 0.0–1.0, or None when neither runtime nor a kind fallback applies
    pub completion_ratio: Option<f64>,
    pub outcome: Outcome,
}

// ============================================
// User-item statistics
// ============================================

/// One row per (user, item) summarizing all of that pair's sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserItemStat {
    pub user_id: String,
    pub item_id: String,
    pub total_sessions: i64,
    pub total_seconds_watched: i64,
    /// Derived: total_seconds_watched / 60.0 (generated column)
    pub total_minutes_watched: f64,
    pub best_completion_ratio: Option<f64>,
    pub average_completion_ratio: Option<f64>,
    /// Sessions beyond the first; always max(0, total_sessions - 1)
    pub rewatch_count: i64,
    pub first_watched_at: NaiveDateTime,
    pub last_watched_at: NaiveDateTime,
    /// Derived: whole days between first and last watch (generated column)
    pub days_between_first_last: i64,
    /// Weighted engagement blend in [0, 1]
    pub adherence_score: f64,
    pub completed_sessions: i64,
    pub partial_sessions: i64,
    pub sampled_sessions: i64,
    pub abandoned_sessions: i64,
}

// ============================================
// Catalog
// ============================================

/// A library catalog entry (referenced, not owned, by the engine).
///
/// The engine only ever reads these; the catalog is populated by the
/// supplemental sync path in [`crate::catalog`] or by an external job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: String,
    pub item_name: String,
    pub item_kind: ItemKind,
    /// Runtime in media-server ticks (10,000,000 per second)
    pub runtime_ticks: Option<i64>,
    pub series_name: Option<String>,
    pub series_id: Option<String>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub premiere_date: Option<String>,
    pub production_year: Option<i64>,
    pub community_rating: Option<f64>,
}

impl CatalogItem {
    /// Canonical runtime in whole seconds, when known and positive
    pub fn runtime_seconds(&self) -> Option<i64> {
        self.runtime_ticks
            .map(|ticks| ticks / 10_000_000)
            .filter(|secs| *secs > 0)
    }
}

// ============================================
// Wire records
// ============================================

/// One playback event as the media server reports it.
///
/// Dates, times, and durations arrive as strings (the server is loose about
/// numeric fields); ingestion owns coercion and validation so a malformed
/// record fails the run with user context instead of dying in deserialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackEvent {
    /// yyyy-MM-dd
    pub date: String,
    /// HH:MM:SS
    pub time: String,
    pub user_id: String,
    pub item_name: String,
    #[serde(deserialize_with = "flexible_string")]
    pub item_id: String,
    /// "Episode", "Movie", ...
    pub item_type: String,
    /// Seconds, as a decimal string
    #[serde(deserialize_with = "flexible_string")]
    pub duration: String,
    #[serde(default)]
    pub remote_address: Option<String>,
    pub user_name: String,
}

/// Full watch history keyed by user display name, ordered per user.
pub type UserWatchHistory = BTreeMap<String, Vec<PlaybackEvent>>;

/// Accept a JSON string or number and normalize it to a string.
///
/// The playlist endpoint sends `item_id` as a number and `duration` as a
/// string, but neither is guaranteed across server versions.
fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Text(s) => s,
        Flexible::Int(i) => i.to_string(),
        Flexible::Float(f) => f.to_string(),
    })
}
