//! Common type aliases for entity identifiers.
//!
//! Titles and jobs are keyed by store-native integers, reviews by the
//! upstream recommendation id string.

/// Store-assigned title identifier (`app_id`).
pub type AppId = i64;

/// Upstream review identifier (`recommendationid`).
pub type ReviewId = String;

/// Analysis job identifier.
pub type JobId = i64;

/// Analysis result (work unit) identifier.
pub type ResultId = i64;

/// Provider credential identifier.
pub type ApiKeyId = i64;
