//! Database record structures and request DTOs.
//!
//! Each table has an entity struct (`sqlx::FromRow`) plus explicit
//! `*CreateDBRequest` / `*UpdateDBRequest` structs used by the
//! repositories. Status-like columns persist as lowercase text; typed
//! enums live alongside the entities with `as_str`/`parse` conversions.

pub mod analysis_jobs;
pub mod analysis_results;
pub mod api_keys;
pub mod catalog;
pub mod games;
pub mod reviews;
pub mod scrape_cursors;
pub mod settings;
