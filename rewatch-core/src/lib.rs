//! # rewatch-core
//!
//! Core library for rewatch - a watch-behavior analytics engine for media
//! servers.
//!
//! This library provides:
//! - Domain types for playback pings, sessions, and per-(user, item) stats
//! - A SQLite storage layer with embedded migrations
//! - The batch refresh engine: ingestion with historical timezone correction,
//!   gap-based session reconstruction, outcome classification, statistics
//!   aggregation, and completion-ratio backfill
//! - Blocking HTTP clients for the media-server event and catalog APIs
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Raw:** every playback ping as delivered, after timezone normalization
//! - **Sessions:** contiguous viewing intervals inferred by gap-clustering
//! - **Stats:** one lifetime summary per (user, item), with adherence scores
//!
//! All three layers are rebuilt from scratch on each run; the catalog table
//! is the only incrementally maintained store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rewatch_core::{Config, Database, RefreshCoordinator};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let coordinator = RefreshCoordinator::new(db, config.engine.clone());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use engine::{RefreshCoordinator, RefreshSummary};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod source;
pub mod types;
