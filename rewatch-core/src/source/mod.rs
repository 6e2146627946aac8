//! Data sources consumed by the engine
//!
//! The engine treats its inputs as pure data sources returning already-shaped
//! records: an [`EventSource`] for playback history and a [`CatalogSource`]
//! for library items. [`MediaServerClient`] implements both against the media
//! server's HTTP API; [`StaticEvents`] wraps an already-fetched history map
//! for tests and for drivers that fetch with their own progress reporting.

pub mod media_server;

pub use media_server::MediaServerClient;

use crate::error::Result;
use crate::types::{CatalogItem, UserWatchHistory};

/// Source of playback events.
pub trait EventSource {
    /// Fetch the full watch history for every known user, keyed by user
    /// display name, with each user's events in server order.
    fn fetch_all_watch_history(
        &self,
        lookback_days: u32,
        aggregated: bool,
    ) -> Result<UserWatchHistory>;
}

/// Source of library catalog items.
pub trait CatalogSource {
    /// Fetch every movie and episode in the library.
    fn fetch_items(&self) -> Result<Vec<CatalogItem>>;
}

/// An [`EventSource`] over history that was already fetched (or fabricated).
pub struct StaticEvents {
    history: UserWatchHistory,
}

impl StaticEvents {
    pub fn new(history: UserWatchHistory) -> Self {
        Self { history }
    }
}

impl EventSource for StaticEvents {
    fn fetch_all_watch_history(
        &self,
        _lookback_days: u32,
        _aggregated: bool,
    ) -> Result<UserWatchHistory> {
        Ok(self.history.clone())
    }
}
