//! Repository implementations for CRUD operations.
//!
//! Each repository wraps a `&mut SqliteConnection` and encapsulates all
//! database access for one table. Create repositories from a transaction
//! when writes must be atomic (batch review persistence), or from a
//! short-lived pool connection for one-shot reads and counters.

pub mod analysis_jobs;
pub mod analysis_results;
pub mod api_keys;
pub mod catalog;
pub mod games;
pub mod repository;
pub mod reviews;
pub mod scrape_cursors;
pub mod settings;

pub use analysis_jobs::AnalysisJobs;
pub use analysis_results::AnalysisResults;
pub use api_keys::ApiKeys;
pub use catalog::Catalog;
pub use games::Games;
pub use repository::Repository;
pub use reviews::Reviews;
pub use scrape_cursors::ScrapeCursors;
pub use settings::Settings;
