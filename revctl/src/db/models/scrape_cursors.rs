//! Saved pagination cursors (`scrape_cursors` table).
//!
//! Cursors are keyed by `(app_id, params_hash)` so runs with different
//! traversal-affecting filters never reuse each other's position.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

use crate::types::AppId;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScrapeCursor {
    pub id: i64,
    pub app_id: AppId,
    pub params_hash: String,
    pub cursor: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}
