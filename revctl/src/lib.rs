//! revctl - review harvesting and LLM batch-analysis engine.
//!
//! The crate is organized around two long-running engines sharing a SQLite
//! persistence substrate:
//!
//! - [`scraper`]: a resumable, rate-limited, cursor-paginated ingestion
//!   engine that pulls user reviews from the store API per title, applies
//!   filters, deduplicates and persists incrementally while publishing a
//!   live progress snapshot.
//! - [`analysis`]: a job orchestrator that materializes per-review work
//!   units, dispatches them to a pluggable LLM provider (batch or
//!   per-request), maps provider responses into canonical fields and
//!   updates job progress under concurrency.
//!
//! Supporting layers: [`db`] (repositories over the relational store),
//! [`steam`] (upstream store clients), [`catalog`] (title catalog
//! backfill), and [`crypto`] (the credential vault).

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod scraper;
pub mod steam;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use errors::{Error, Result};

/// Migrator for the embedded SQL migrations.
///
/// Run with `revctl::migrator().run(&pool).await?` after connecting.
pub fn migrator() -> &'static sqlx::migrate::Migrator {
    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
    &MIGRATOR
}
