//! Analysis job records (`analysis_jobs` table).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::JobId;

/// Lifecycle state of an analysis job. Status advances monotonically to
/// `completed` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisJob {
    pub id: JobId,
    pub status: String,
    pub total_reviews: i64,
    pub processed_count: i64,
    /// Serialized settings blob for the run (filters + provider settings)
    pub settings: Option<String>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

/// Request to create a job row in `pending`.
#[derive(Debug, Clone)]
pub struct AnalysisJobCreateDBRequest {
    pub settings: Option<String>,
}
