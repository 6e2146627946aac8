//! Database layer for rewatch
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - Pre-refresh file backups

pub mod repo;
pub mod schema;

pub use repo::{backup_database, format_datetime, Database, DATETIME_FORMAT};
