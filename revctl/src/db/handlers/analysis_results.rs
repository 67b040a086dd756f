//! Database repository for analysis result work units.

use chrono::Utc;
use sqlx::{QueryBuilder, SqliteConnection};
use tracing::instrument;

use crate::analysis::mapper::MappedOutput;
use crate::db::errors::{DbError, Result};
use crate::db::models::analysis_results::{
    AnalysisResult, AnalysisResultCreateDBRequest, AnalysisResultFilter, ResultStatus,
};
use crate::types::{JobId, ResultId};

pub struct AnalysisResults<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> AnalysisResults<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(job_id = request.job_id), err)]
    pub async fn create(&mut self, request: &AnalysisResultCreateDBRequest) -> Result<AnalysisResult> {
        let result = sqlx::query_as::<_, AnalysisResult>(
            r#"
            INSERT INTO analysis_results (
                job_id, app_id, game_name, review_id, review_text_snapshot,
                prompt_used, model, llm_provider, reasoning_effort, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
            RETURNING *
            "#,
        )
        .bind(request.job_id)
        .bind(request.app_id)
        .bind(&request.game_name)
        .bind(&request.review_id)
        .bind(&request.review_text_snapshot)
        .bind(&request.prompt_used)
        .bind(&request.model)
        .bind(&request.llm_provider)
        .bind(&request.reasoning_effort)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(result)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: ResultId) -> Result<Option<AnalysisResult>> {
        let result =
            sqlx::query_as::<_, AnalysisResult>("SELECT * FROM analysis_results WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(result)
    }

    /// Work units for a job in insertion order.
    #[instrument(skip(self), err)]
    pub async fn list_for_job(&mut self, job_id: JobId) -> Result<Vec<AnalysisResult>> {
        let results = sqlx::query_as::<_, AnalysisResult>(
            "SELECT * FROM analysis_results WHERE job_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(results)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list(&mut self, filter: &AnalysisResultFilter) -> Result<Vec<AnalysisResult>> {
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT * FROM analysis_results WHERE 1=1");
        if let Some(job_id) = filter.job_id {
            qb.push(" AND job_id = ").push_bind(job_id);
        }
        if let Some(app_id) = filter.app_id {
            qb.push(" AND app_id = ").push_bind(app_id);
        }
        if let Some(review_id) = &filter.review_id {
            qb.push(" AND review_id = ").push_bind(review_id.clone());
        }
        if let Some(status) = &filter.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
        qb.push(" ORDER BY created_at ASC, id ASC");
        qb.push(" LIMIT ").push_bind(filter.limit);
        qb.push(" OFFSET ").push_bind(filter.offset);

        let results = qb
            .build_query_as::<AnalysisResult>()
            .fetch_all(&mut *self.db)
            .await?;
        Ok(results)
    }

    /// Store a provider output on a pending work unit, along with whatever
    /// the mapper extracted. The status predicate keeps terminal states
    /// write-once.
    #[instrument(skip(self, analysis_output, mapped), err)]
    pub async fn complete_with_output(
        &mut self,
        id: ResultId,
        analysis_output: &str,
        mapped: &MappedOutput,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_results
            SET analysis_output = ?,
                analysed_review = COALESCE(?, analysed_review),
                input_tokens = COALESCE(?, input_tokens),
                output_tokens = COALESCE(?, output_tokens),
                total_tokens = COALESCE(?, total_tokens),
                status = ?,
                error = ?,
                completed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(analysis_output)
        .bind(&mapped.analysed_review)
        .bind(mapped.input_tokens)
        .bind(mapped.output_tokens)
        .bind(mapped.total_tokens)
        .bind(ResultStatus::Complete.as_str())
        .bind(error)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Rows eligible for the mapper backfill: raw output present, mapped
    /// content absent.
    #[instrument(skip(self), err)]
    pub async fn list_unmapped(&mut self, limit: i64) -> Result<Vec<AnalysisResult>> {
        let results = sqlx::query_as::<_, AnalysisResult>(
            r#"
            SELECT * FROM analysis_results
            WHERE analysed_review IS NULL AND analysis_output IS NOT NULL
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(results)
    }

    /// Apply re-mapped canonical fields to an existing row (backfill path;
    /// does not touch status).
    #[instrument(skip(self, mapped), err)]
    pub async fn apply_mapped(
        &mut self,
        id: ResultId,
        mapped: &MappedOutput,
        game_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analysis_results
            SET analysed_review = COALESCE(?, analysed_review),
                input_tokens = COALESCE(?, input_tokens),
                output_tokens = COALESCE(?, output_tokens),
                total_tokens = COALESCE(?, total_tokens),
                analysis_output = COALESCE(?, analysis_output),
                game_name = COALESCE(?, game_name)
            WHERE id = ?
            "#,
        )
        .bind(&mapped.analysed_review)
        .bind(mapped.input_tokens)
        .bind(mapped.output_tokens)
        .bind(mapped.total_tokens)
        .bind(&mapped.analysis_output)
        .bind(game_name)
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }
}
