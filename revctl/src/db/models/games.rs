//! Title catalog entries (`games` table).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::AppId;

/// A curated title whose reviews are harvested.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Game {
    pub app_id: AppId,
    pub name: String,
    pub added_at: NaiveDateTime,
    pub last_scraped_at: Option<NaiveDateTime>,
}

/// Request to add a title to the harvest set.
#[derive(Debug, Clone, Deserialize)]
pub struct GameCreateDBRequest {
    pub app_id: AppId,
    pub name: String,
}
