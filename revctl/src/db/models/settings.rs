//! Key/value settings store (`settings` table).
//!
//! Holds the active-prompt pointer (`prompts:active`) and UI settings
//! snapshots (`scraper:settings`, `analysis:settings`, `llm:config`).

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: Option<NaiveDateTime>,
}
