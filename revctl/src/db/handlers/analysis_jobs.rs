//! Database repository for analysis jobs.
//!
//! Progress counters are updated with read-modify-write SQL so concurrent
//! batch workers serialize through the store: `processed_count` only ever
//! moves forward and never exceeds `total_reviews`.

use chrono::{NaiveDateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::models::analysis_jobs::{AnalysisJob, AnalysisJobCreateDBRequest, JobStatus};
use crate::types::JobId;

pub struct AnalysisJobs<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> AnalysisJobs<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), err)]
    pub async fn create(&mut self, request: &AnalysisJobCreateDBRequest) -> Result<AnalysisJob> {
        let job = sqlx::query_as::<_, AnalysisJob>(
            r#"
            INSERT INTO analysis_jobs (status, settings)
            VALUES ('pending', ?)
            RETURNING *
            "#,
        )
        .bind(&request.settings)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(job)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: JobId) -> Result<Option<AnalysisJob>> {
        let job = sqlx::query_as::<_, AnalysisJob>("SELECT * FROM analysis_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(job)
    }

    /// Jobs newest-first.
    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<AnalysisJob>> {
        let jobs =
            sqlx::query_as::<_, AnalysisJob>("SELECT * FROM analysis_jobs ORDER BY created_at DESC, id DESC")
                .fetch_all(&mut *self.db)
                .await?;
        Ok(jobs)
    }

    /// Transition to `running` with the materialized unit count.
    #[instrument(skip(self), err)]
    pub async fn mark_running(
        &mut self,
        id: JobId,
        total_reviews: i64,
        started_at: NaiveDateTime,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET status = ?, total_reviews = ?, started_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Running.as_str())
        .bind(total_reviews)
        .bind(started_at)
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Set `processed_count` to an absolute value reported by a provider
    /// progress callback. Monotonic: never moves backwards, never exceeds
    /// `total_reviews`. Optionally overwrites the total when the provider
    /// reports one.
    #[instrument(skip(self), err)]
    pub async fn report_processed(
        &mut self,
        id: JobId,
        processed: i64,
        total: Option<i64>,
    ) -> Result<()> {
        if let Some(total) = total {
            sqlx::query("UPDATE analysis_jobs SET total_reviews = ? WHERE id = ?")
                .bind(total)
                .bind(id)
                .execute(&mut *self.db)
                .await?;
        }
        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET processed_count = MIN(total_reviews, MAX(processed_count, ?))
            WHERE id = ?
            "#,
        )
        .bind(processed)
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn mark_completed(&mut self, id: JobId) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_jobs SET status = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error), err)]
    pub async fn mark_error(&mut self, id: JobId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_jobs SET status = ?, error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Error.as_str())
        .bind(error)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }
}
