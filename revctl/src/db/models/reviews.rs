//! Harvested review records (`reviews` table).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{AppId, ReviewId};

/// A user-authored recommendation tied to a title.
///
/// `review_date` is naive UTC derived from the upstream UNIX timestamp and
/// `playtime_hours` is the author's `playtime_forever` minutes divided by
/// 60. `review_type` holds `positive`/`negative`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub review_id: ReviewId,
    pub app_id: AppId,
    pub review_text: String,
    pub review_date: NaiveDateTime,
    pub playtime_hours: Option<f64>,
    pub review_type: String,
    pub language: String,
    pub early_access: bool,
    pub received_for_free: bool,
    pub timestamp_updated: Option<NaiveDateTime>,
    pub votes_helpful: Option<i64>,
    pub weighted_vote_score: Option<f64>,
    pub comment_count: Option<i64>,
    pub steam_purchase: Option<bool>,
    pub num_games_owned: Option<i64>,
    pub num_reviews: Option<i64>,
    pub playtime_last_two_weeks: Option<f64>,
    pub last_played: Option<NaiveDateTime>,
    pub scraped_at: NaiveDateTime,
}

/// Request to persist one harvested review.
#[derive(Debug, Clone)]
pub struct ReviewCreateDBRequest {
    pub review_id: ReviewId,
    pub app_id: AppId,
    pub review_text: String,
    pub review_date: NaiveDateTime,
    pub playtime_hours: Option<f64>,
    pub review_type: String,
    pub language: String,
    pub early_access: bool,
    pub received_for_free: bool,
    pub timestamp_updated: Option<NaiveDateTime>,
    pub votes_helpful: Option<i64>,
    pub weighted_vote_score: Option<f64>,
    pub comment_count: Option<i64>,
    pub steam_purchase: Option<bool>,
    pub num_games_owned: Option<i64>,
    pub num_reviews: Option<i64>,
    pub playtime_last_two_weeks: Option<f64>,
    pub last_played: Option<NaiveDateTime>,
}

/// Tri-state policy for boolean review attributes (early access, free
/// copies): keep everything, drop matches, or keep only matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
    Only,
}

impl FilterMode {
    /// Whether a review with the given attribute value passes this policy.
    pub fn allows(self, value: bool) -> bool {
        match self {
            FilterMode::Include => true,
            FilterMode::Exclude => !value,
            FilterMode::Only => value,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterMode::Include => "include",
            FilterMode::Exclude => "exclude",
            FilterMode::Only => "only",
        }
    }
}

/// Shared filter grammar over stored reviews, used by the scrape resume
/// check, the analysis preview and work-unit selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    pub app_id: Option<AppId>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub review_type: Option<String>,
    pub min_playtime: Option<f64>,
    pub max_playtime: Option<f64>,
    #[serde(default)]
    pub early_access: FilterMode,
    #[serde(default)]
    pub received_for_free: FilterMode,
    pub language: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
