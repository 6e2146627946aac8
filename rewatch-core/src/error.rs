//! Error types for rewatch-core

use thiserror::Error;

/// Main error type for the rewatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Media server / event source error (connectivity, HTTP, bad response)
    #[error("media server error: {0}")]
    Source(String),

    /// Malformed playback event. Fatal for the whole ingestion run.
    #[error("bad playback event for user '{user}': {detail}")]
    Ingest { user: String, detail: String },
}

/// Result type alias for rewatch-core
pub type Result<T> = std::result::Result<T, Error>;
