//! Database layer for data persistence and access.
//!
//! Implements the data access layer using SQLx over SQLite, following the
//! repository pattern: one handler per table in [`handlers`], entity
//! structs and request DTOs in [`models`], and a unified [`errors::DbError`]
//! produced from sqlx error categorization.
//!
//! The store is a single database file (or `sqlite::memory:` in tests).
//! Connections enforce foreign keys so titles cascade-delete their reviews,
//! and use WAL with a busy timeout so the orchestrator's short-lived worker
//! sessions can commit concurrently.

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::Result;

/// Open a pool for the given SQLite URL (e.g. `sqlite://revctl.db`),
/// creating the database file if missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(crate::db::errors::DbError::from)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(crate::db::errors::DbError::from)?;

    Ok(pool)
}

/// Connect and run migrations in one step.
pub async fn connect_and_migrate(database_url: &str) -> Result<SqlitePool> {
    let pool = connect(database_url).await?;
    crate::migrator()
        .run(&pool)
        .await
        .map_err(|e| crate::db::errors::DbError::Other(anyhow::Error::from(e)))?;
    Ok(pool)
}
