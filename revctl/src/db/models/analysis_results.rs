//! Analysis result work units (`analysis_results` table).
//!
//! A result row snapshots the review text and prompt at materialization
//! time so the unit stays analyzable even if the review is deleted later.
//! Terminal status is set exactly once.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{AppId, JobId, ResultId, ReviewId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Complete,
    Error,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Complete => "complete",
            ResultStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisResult {
    pub id: ResultId,
    pub job_id: JobId,
    pub app_id: Option<AppId>,
    pub game_name: Option<String>,
    pub review_id: Option<ReviewId>,
    pub review_text_snapshot: Option<String>,
    pub prompt_used: Option<String>,
    pub model: Option<String>,
    pub llm_provider: Option<String>,
    pub reasoning_effort: Option<String>,
    /// Raw provider output (canonical string form)
    pub analysis_output: Option<String>,
    /// Mapped assistant content extracted from the raw output
    pub analysed_review: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

/// Request to materialize one pending work unit for a job.
#[derive(Debug, Clone)]
pub struct AnalysisResultCreateDBRequest {
    pub job_id: JobId,
    pub app_id: Option<AppId>,
    pub game_name: Option<String>,
    pub review_id: Option<ReviewId>,
    pub review_text_snapshot: Option<String>,
    pub prompt_used: Option<String>,
    pub model: Option<String>,
    pub llm_provider: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Filter for listing results.
#[derive(Debug, Clone, Default)]
pub struct AnalysisResultFilter {
    pub job_id: Option<JobId>,
    pub app_id: Option<AppId>,
    pub review_id: Option<ReviewId>,
    pub status: Option<String>,
    pub limit: i64,
    pub offset: i64,
}
