//! Analysis orchestration engine.
//!
//! Owns the lifecycle of an analysis job: select matching reviews with
//! the shared filter grammar, materialize one pending result row per
//! review (snapshotting text, prompt, model and provider), dispatch
//! batches to the provider on a bounded worker pool, map responses into
//! canonical fields, and keep `processed_count` moving through a single
//! progress channel so updates serialize through the store.

pub mod mapper;
pub mod prompts;
pub mod providers;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Acquire, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, instrument, warn};

use crate::config::Config;
use crate::crypto::Vault;
use crate::db::errors::DbError;
use crate::db::handlers::{AnalysisJobs, AnalysisResults, Games, Repository, Reviews};
use crate::db::models::analysis_jobs::{AnalysisJob, AnalysisJobCreateDBRequest};
use crate::db::models::analysis_results::{
    AnalysisResult, AnalysisResultCreateDBRequest, AnalysisResultFilter,
};
use crate::db::models::reviews::{FilterMode, Review, ReviewFilter};
use crate::errors::{Error, Result};
use crate::scraper::settings::parse_date;
use crate::types::{AppId, JobId, ResultId};

pub use mapper::{MappedOutput, ProviderResponse};
pub use providers::{Provider, ReasoningEffort};

const DEFAULT_PREVIEW_LIMIT: i64 = 50;
const DEFAULT_MODEL: &str = "gpt-5";
const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_REVIEWS_PER_BATCH: usize = 5;

/// Review selection filter as supplied by callers; dates are `YYYY-MM-DD`
/// day bounds (end expands to inclusive end-of-day).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalysisFilterPayload {
    pub app_id: Option<AppId>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub review_type: Option<String>,
    pub min_playtime: Option<f64>,
    pub max_playtime: Option<f64>,
    pub early_access: Option<FilterMode>,
    pub received_for_free: Option<FilterMode>,
    pub language: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AnalysisFilterPayload {
    pub fn to_review_filter(&self) -> Result<ReviewFilter> {
        if let (Some(min), Some(max)) = (self.min_playtime, self.max_playtime) {
            if max <= min {
                return Err(Error::bad_request(
                    "max_playtime must be greater than min_playtime",
                ));
            }
        }
        Ok(ReviewFilter {
            app_id: self.app_id,
            start_date: self.start_date.as_deref().map(|s| parse_date(s, false)).transpose()?,
            end_date: self.end_date.as_deref().map(|s| parse_date(s, true)).transpose()?,
            review_type: self.review_type.clone(),
            min_playtime: self.min_playtime,
            max_playtime: self.max_playtime,
            early_access: self.early_access.unwrap_or_default(),
            received_for_free: self.received_for_free.unwrap_or_default(),
            language: self.language.clone(),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReasoningPayload {
    pub effort: Option<ReasoningEffort>,
}

/// Start payload for an analysis job: review filters plus provider
/// settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StartAnalysisRequest {
    #[serde(flatten)]
    pub filter: AnalysisFilterPayload,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub reasoning: Option<ReasoningPayload>,
    /// Work units per provider call
    pub reviews_per_batch: Option<usize>,
    /// Concurrent provider calls
    pub batches_per_request: Option<usize>,
}

/// Outcome of a mapper backfill pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackfillOutcome {
    pub updated: i64,
    pub scanned: i64,
}

/// Counter value to persist. Values come from one job-wide atomic, so
/// they are already totals; the store write is a monotonic max capped at
/// `total_reviews`.
struct ProgressUpdate {
    processed: i64,
}

/// The orchestrator. Construct once and share (`Arc`); `start` creates
/// the job row and schedules the background worker.
pub struct AnalysisService {
    pool: SqlitePool,
    vault: Arc<Vault>,
    config: Arc<Config>,
}

impl AnalysisService {
    pub fn new(pool: SqlitePool, vault: Arc<Vault>, config: Arc<Config>) -> Self {
        Self { pool, vault, config }
    }

    /// Preview the reviews a filter would select, newest first. Returns
    /// `(reviews, total)` where total counts all matches.
    #[instrument(skip(self, payload), err)]
    pub async fn preview(&self, payload: &AnalysisFilterPayload) -> Result<(Vec<Review>, i64)> {
        let mut filter = payload.to_review_filter()?;
        filter.limit = Some(filter.limit.unwrap_or(DEFAULT_PREVIEW_LIMIT));
        filter.offset = Some(filter.offset.unwrap_or(0));

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut reviews = Reviews::new(&mut conn);
        let total = reviews.count_matching(&filter).await?;
        let page = reviews.page(&filter).await?;
        Ok((page, total))
    }

    /// Start an analysis job. Validates the payload, creates the job row
    /// in `pending`, and schedules the worker. Returns the job id.
    #[instrument(skip(self, request), err)]
    pub async fn start(self: Arc<Self>, request: StartAnalysisRequest) -> Result<JobId> {
        request.filter.to_review_filter()?;
        if request.reviews_per_batch == Some(0) {
            return Err(Error::bad_request("reviews_per_batch must be at least 1"));
        }
        if request.batches_per_request == Some(0) {
            return Err(Error::bad_request("batches_per_request must be at least 1"));
        }

        let settings = serde_json::to_string(&request)?;
        let job = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            AnalysisJobs::new(&mut conn)
                .create(&AnalysisJobCreateDBRequest {
                    settings: Some(settings),
                })
                .await?
        };

        let service = self;
        let job_id = job.id;
        tokio::spawn(async move {
            if let Err(e) = service.run_job(job_id, request).await {
                error!(job_id, error = %e, "Analysis job failed");
                if let Ok(mut conn) = service.pool.acquire().await {
                    if let Err(mark_err) =
                        AnalysisJobs::new(&mut conn).mark_error(job_id, &e.to_string()).await
                    {
                        error!(job_id, error = %mark_err, "Failed to record job error");
                    }
                }
            }
        });
        Ok(job_id)
    }

    #[instrument(skip(self, request), err)]
    async fn run_job(&self, job_id: JobId, request: StartAnalysisRequest) -> Result<()> {
        let prompt_text = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            prompts::load_active_prompt(&mut conn, &self.config.prompts_dir).await?
        };

        let provider_name = request
            .provider
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let provider = providers::provider_for_name(
            &self.pool,
            &self.vault,
            &self.config.openai,
            &provider_name,
        )
        .await?;

        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let reasoning = request.reasoning.as_ref().and_then(|r| r.effort);
        let reviews_per_batch = request
            .reviews_per_batch
            .unwrap_or(DEFAULT_REVIEWS_PER_BATCH)
            .max(1);
        let batches_per_request = request.batches_per_request.unwrap_or(1).max(1);

        // Select matching reviews with the preview predicates.
        let filter = request.filter.to_review_filter()?;
        let reviews = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            Reviews::new(&mut conn).page(&filter).await?
        };

        let game_names = self.game_names_for(&reviews).await?;

        // Materialize one pending work unit per review.
        {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            let mut results = AnalysisResults::new(&mut conn);
            for review in &reviews {
                results
                    .create(&AnalysisResultCreateDBRequest {
                        job_id,
                        app_id: Some(review.app_id),
                        game_name: game_names.get(&review.app_id).cloned(),
                        review_id: Some(review.review_id.clone()),
                        review_text_snapshot: Some(review.review_text.clone()),
                        prompt_used: Some(prompt_text.clone()),
                        model: Some(model.clone()),
                        llm_provider: Some(provider_name.clone()),
                        reasoning_effort: reasoning.map(|e| e.as_str().to_string()),
                    })
                    .await?;
            }
        }

        {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            AnalysisJobs::new(&mut conn)
                .mark_running(job_id, reviews.len() as i64, Utc::now().naive_utc())
                .await?;
        }

        let units = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            AnalysisResults::new(&mut conn).list_for_job(job_id).await?
        };
        let batches: Vec<Vec<AnalysisResult>> = units
            .chunks(reviews_per_batch)
            .map(|chunk| chunk.to_vec())
            .collect();

        // Single progress channel: all counter writes serialize through
        // one updater task.
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let updater_pool = self.pool.clone();
        let updater = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let Ok(mut conn) = updater_pool.acquire().await else {
                    continue;
                };
                let outcome = AnalysisJobs::new(&mut conn)
                    .report_processed(job_id, update.processed, None)
                    .await;
                if let Err(e) = outcome {
                    warn!(job_id, error = %e, "Failed to update job progress");
                }
            }
        });

        // Job-wide processed counter shared by the batch workers.
        let processed_counter = Arc::new(AtomicI64::new(0));
        let semaphore = Arc::new(Semaphore::new(batches_per_request));
        let completion_window = self.config.openai.completion_window.clone();
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();
        for batch in batches {
            let semaphore = semaphore.clone();
            let pool = self.pool.clone();
            let provider = provider.clone();
            let tx = tx.clone();
            let completion_window = completion_window.clone();
            let processed_counter = processed_counter.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(anyhow::Error::from(e)))?;
                process_batch(pool, provider, batch, completion_window, tx, processed_counter).await
            });
        }
        drop(tx);

        let mut first_error: Option<Error> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Other(anyhow::Error::from(join_error)));
                    }
                }
            }
        }
        let _ = updater.await;

        if let Some(e) = first_error {
            return Err(e);
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        AnalysisJobs::new(&mut conn).mark_completed(job_id).await?;
        Ok(())
    }

    async fn game_names_for(&self, reviews: &[Review]) -> Result<HashMap<AppId, String>> {
        let mut names = HashMap::new();
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut games = Games::new(&mut conn);
        for review in reviews {
            if names.contains_key(&review.app_id) {
                continue;
            }
            if let Some(game) = games.get_by_id(review.app_id).await? {
                names.insert(review.app_id, game.name);
            }
        }
        Ok(names)
    }

    pub async fn list_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(AnalysisJobs::new(&mut conn).list().await?)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<AnalysisJob> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        AnalysisJobs::new(&mut conn)
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "AnalysisJob".to_string(),
                id: job_id.to_string(),
            })
    }

    pub async fn list_job_results(&self, job_id: JobId) -> Result<Vec<AnalysisResult>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(AnalysisResults::new(&mut conn).list_for_job(job_id).await?)
    }

    pub async fn list_results(&self, filter: &AnalysisResultFilter) -> Result<Vec<AnalysisResult>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(AnalysisResults::new(&mut conn).list(filter).await?)
    }

    pub async fn get_result(&self, result_id: ResultId) -> Result<AnalysisResult> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        AnalysisResults::new(&mut conn)
            .get_by_id(result_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "AnalysisResult".to_string(),
                id: result_id.to_string(),
            })
    }

    /// Re-map results whose raw output is present but whose canonical
    /// fields are missing, bounded by `limit`. Also fills missing game
    /// names from the review's title where possible.
    #[instrument(skip(self), err)]
    pub async fn backfill(&self, limit: i64) -> Result<BackfillOutcome> {
        let rows = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            AnalysisResults::new(&mut conn).list_unmapped(limit).await?
        };
        let scanned = rows.len() as i64;
        let mut updated = 0;

        for row in rows {
            let Some(raw) = row.analysis_output.clone() else {
                continue;
            };
            let mapped = mapper::map_response(&ProviderResponse::Text(raw));

            let mut game_name = None;
            if row.game_name.is_none() {
                if let Some(review_id) = &row.review_id {
                    let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
                    let review = Reviews::new(&mut conn).get_by_id(review_id).await?;
                    if let Some(review) = review {
                        game_name = Games::new(&mut conn)
                            .get_by_id(review.app_id)
                            .await?
                            .map(|game| game.name);
                    }
                }
            }

            let has_mapped_fields = mapped.analysed_review.is_some()
                || mapped.input_tokens.is_some()
                || mapped.output_tokens.is_some()
                || mapped.total_tokens.is_some();
            if has_mapped_fields || game_name.is_some() {
                let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
                AnalysisResults::new(&mut conn)
                    .apply_mapped(row.id, &mapped, game_name.as_deref())
                    .await?;
                updated += 1;
            }
        }

        Ok(BackfillOutcome { updated, scanned })
    }
}

/// Run one batch: call the provider, persist mapped outputs in a single
/// transaction, then advance the job counter if the provider did not
/// report progress itself.
async fn process_batch(
    pool: SqlitePool,
    provider: Arc<dyn Provider>,
    batch: Vec<AnalysisResult>,
    completion_window: String,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
    processed_counter: Arc<AtomicI64>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let inputs: Vec<String> = batch
        .iter()
        .map(|unit| unit.review_text_snapshot.clone().unwrap_or_default())
        .collect();
    let prompt = batch[0].prompt_used.clone().unwrap_or_default();
    let model = batch[0].model.clone().unwrap_or_default();
    let reasoning = batch[0]
        .reasoning_effort
        .as_deref()
        .and_then(|s| s.parse::<ReasoningEffort>().ok());

    // Provider callbacks report completion within this batch; fold the
    // delta into the job-wide counter so overlapping batches never
    // double-count or clobber each other.
    let provider_reported = Arc::new(AtomicBool::new(false));
    let batch_reported = Arc::new(AtomicI64::new(0));
    let progress: providers::ProgressFn = {
        let tx = tx.clone();
        let flag = provider_reported.clone();
        let counter = processed_counter.clone();
        let batch_reported = batch_reported.clone();
        Arc::new(move |completed, _total| {
            flag.store(true, Ordering::SeqCst);
            let completed = completed as i64;
            let previous = batch_reported.swap(completed, Ordering::SeqCst);
            let delta = (completed - previous).max(0);
            if delta > 0 {
                let value = counter.fetch_add(delta, Ordering::SeqCst) + delta;
                let _ = tx.send(ProgressUpdate { processed: value });
            }
        })
    };

    let outputs = provider
        .analyze_batch(
            &inputs,
            &prompt,
            &model,
            reasoning,
            &completion_window,
            Some(progress),
        )
        .await?;

    // Persist this batch's outputs in one transaction.
    {
        let mut dbtx = pool.begin().await.map_err(DbError::from)?;
        {
            let conn = dbtx.acquire().await.map_err(DbError::from)?;
            let mut results = AnalysisResults::new(conn);
            for (index, unit) in batch.iter().enumerate() {
                let value = outputs
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| json!({"error": "missing provider output"}));
                let mapped = mapper::map_value(&value);
                results
                    .complete_with_output(unit.id, &mapped.analysis_output, &mapped, None)
                    .await?;
            }
        }
        dbtx.commit().await.map_err(DbError::from)?;
    }

    if !provider_reported.load(Ordering::SeqCst) {
        let delta = batch.len() as i64;
        let value = processed_counter.fetch_add(delta, Ordering::SeqCst) + delta;
        let _ = tx.send(ProgressUpdate { processed: value });
    }
    Ok(())
}
