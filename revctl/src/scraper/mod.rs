//! Review ingestion engine.
//!
//! Drives the store review API to completion (or cap) per title:
//! cursor-paginated fetches, per-review filters, dedupe by review id,
//! incremental persistence, resume from the newest stored review, rate
//! limiting and cooperative cancellation. At most one ingestion run is
//! active process-wide; progress is published through
//! [`progress::ProgressTracker`].

pub mod progress;
pub mod settings;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Acquire, SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::handlers::{Games, Repository, Reviews, ScrapeCursors};
use crate::db::models::games::Game;
use crate::db::models::reviews::ReviewCreateDBRequest;
use crate::errors::{Error, Result};
use crate::steam::{SteamClient, SteamReview};
use crate::types::AppId;

pub use progress::{CurrentGame, ProgressSnapshot, ProgressTracker};
pub use settings::{ScrapeSettings, ScrapeSettingsPayload, StartScrapeRequest};

/// Consecutive no-save pages tolerated before jumping to the saved cursor.
const DUPLICATE_PAGE_LIMIT: u32 = 3;

fn naive_utc_from_unix(ts: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.naive_utc())
}

struct BatchOutcome {
    saved: i64,
    /// An integrity violation discarded the transaction; `saved` reflects
    /// the rows attempted before the failure.
    rolled_back: bool,
}

/// The ingestion engine. Construct once and share (`Arc`); `start` spawns
/// the run task, `stop` requests cooperative cancellation, `status`
/// returns the live snapshot.
pub struct ScraperService {
    pool: SqlitePool,
    steam: SteamClient,
    progress: Arc<ProgressTracker>,
    start_lock: Mutex<()>,
}

impl ScraperService {
    pub fn new(pool: SqlitePool, steam: SteamClient) -> Self {
        Self {
            pool,
            steam,
            progress: Arc::new(ProgressTracker::new()),
            start_lock: Mutex::new(()),
        }
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub fn status(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Start an ingestion run. Validates the global settings and every
    /// per-title override up front; fails with a conflict when a run is
    /// already active. The run itself executes on a background task.
    #[instrument(skip(self, request), err)]
    pub async fn start(self: Arc<Self>, request: StartScrapeRequest) -> Result<()> {
        // Validate before touching any state: a bad payload must not
        // create a run.
        let global = ScrapeSettings::resolve(&request.global_settings)?;
        for (app_id, override_payload) in &request.per_game_overrides {
            app_id
                .parse::<AppId>()
                .map_err(|_| Error::bad_request(format!("invalid app id '{app_id}' in overrides")))?;
            ScrapeSettings::resolve(&override_payload.merged_over(&request.global_settings))?;
        }

        let _guard = self.start_lock.lock().await;
        if self.progress.is_running() {
            return Err(Error::conflict("Scraper already running"));
        }
        self.progress.start_run(global.rate_limit_rpm);
        self.progress.log("Starting scraper");
        drop(_guard);

        let service = self;
        tokio::spawn(async move {
            if let Err(e) = service.run(request).await {
                service.progress.log(format!("Scraper failed: {e}"));
            }
            service.progress.finish_run();
            service.progress.log("Scraper finished");
        });
        Ok(())
    }

    /// Request cooperative cancellation; the run exits after the batch it
    /// is currently saving.
    pub fn stop(&self) {
        if self.progress.request_stop() {
            self.progress.log("Stop requested");
        }
    }

    async fn run(&self, request: StartScrapeRequest) -> Result<()> {
        let global = ScrapeSettings::resolve(&request.global_settings)?;

        let active_games = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            Games::new(&mut conn).list().await?
        };

        // Rough initial estimate; refined per title once the store reports
        // its own total. In complete-scraping mode totals accumulate as
        // titles are discovered instead.
        if !global.complete_scraping {
            self.progress
                .set_global_total(active_games.len() as i64 * global.max_reviews);
        }

        for game in &active_games {
            if self.progress.stop_requested() {
                break;
            }
            let payload = match request.per_game_overrides.get(&game.app_id.to_string()) {
                Some(override_payload) => override_payload.merged_over(&request.global_settings),
                None => request.global_settings.clone(),
            };
            let settings = ScrapeSettings::resolve(&payload)?;
            if let Err(e) = self.scrape_game(game, &settings).await {
                self.progress.log(format!(
                    "Scrape failed for {} ({}): {e}",
                    game.name, game.app_id
                ));
            }
        }
        Ok(())
    }

    #[instrument(skip(self, game, settings), fields(app_id = game.app_id), err)]
    async fn scrape_game(&self, game: &Game, settings: &ScrapeSettings) -> Result<()> {
        self.progress.set_current_game(Some(CurrentGame {
            app_id: game.app_id,
            name: game.name.clone(),
        }));
        self.progress
            .log(format!("Starting scrape for {} ({})", game.name, game.app_id));

        let params_hash = settings.params_hash();
        let saved_cursor = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            ScrapeCursors::new(&mut conn)
                .get(game.app_id, &params_hash)
                .await?
                .and_then(|row| row.cursor)
        };

        // Resume floor: newest matching stored review (date bounds aside),
        // unless the configured start date is newer.
        let configured_start = settings.start_date;
        let (latest, existing_db_count) = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            let mut reviews = Reviews::new(&mut conn);

            let mut resume_filter = settings.review_filter(game.app_id);
            resume_filter.start_date = None;
            resume_filter.end_date = None;
            let latest = reviews.latest_review_date(&resume_filter).await?;

            let existing = reviews
                .count_matching(&settings.review_filter(game.app_id))
                .await?;
            (latest, existing)
        };

        let mut threshold_start = configured_start;
        if let Some(latest) = latest {
            if threshold_start.is_none_or(|t| latest > t) {
                threshold_start = Some(latest);
            }
        }

        self.progress.log(format!(
            "Resume check for {}: latest_in_db={latest:?}, configured_start={configured_start:?}, existing_matches={existing_db_count}, requested_max={}",
            game.name,
            if settings.complete_scraping { "all".to_string() } else { settings.max_reviews.to_string() }
        ));

        let mut remaining_needed: Option<i64> = if settings.complete_scraping {
            None
        } else {
            Some((settings.max_reviews - existing_db_count).max(0))
        };

        if remaining_needed == Some(0) {
            self.progress
                .add_scraped(existing_db_count.min(settings.max_reviews));
            self.progress.log(format!(
                "No new reviews for '{}' are available. All reviews that meet the configuration settings have been gathered.",
                game.name
            ));
            return Ok(());
        }

        // With no configured start date and the cap not yet met, clear the
        // floor so older pages can be fetched to fill the cap.
        if configured_start.is_none() && existing_db_count > 0 {
            threshold_start = None;
        }

        let mut cursor = "*".to_string();
        let mut saved_count: i64 = 0;
        let mut no_new_found = false;
        let mut consecutive_no_save_pages: u32 = 0;
        let mut used_saved_cursor = false;

        loop {
            let started = Instant::now();
            let fetched = self
                .steam
                .fetch_review_page(game.app_id, &settings.language, &cursor)
                .await;
            self.progress.record_request(started.elapsed().as_secs_f64());
            let page = fetched?;

            if self.progress.current_game_total() == 0 {
                let q_total = page.query_summary.total();
                let chosen = if settings.complete_scraping {
                    q_total
                } else if q_total > 0 {
                    q_total.min(settings.max_reviews)
                } else {
                    settings.max_reviews
                };
                self.progress.set_current_game_total(chosen);
                if settings.complete_scraping {
                    self.progress.adjust_global_total(chosen);
                } else {
                    self.progress.adjust_global_total(chosen - settings.max_reviews);
                }
            }

            // Early stop: nothing in this batch is newer than the floor.
            if !page.reviews.is_empty() {
                if let Some(threshold) = threshold_start {
                    let batch_max = page
                        .reviews
                        .iter()
                        .filter_map(|r| r.timestamp_created)
                        .max()
                        .and_then(naive_utc_from_unix);
                    if batch_max.is_some_and(|max| max <= threshold) {
                        self.progress.log(format!(
                            "No new reviews for '{}' are available. All reviews that meet the configuration settings have been gathered.",
                            game.name
                        ));
                        no_new_found = true;
                        break;
                    }
                }
            }

            let saved_this_batch = self
                .save_reviews(game.app_id, &page.reviews, settings, threshold_start, remaining_needed)
                .await?;
            saved_count += saved_this_batch;
            self.progress.add_scraped(saved_this_batch);
            if let Some(remaining) = remaining_needed.as_mut() {
                *remaining -= saved_this_batch;
            }

            if saved_this_batch == 0 {
                consecutive_no_save_pages += 1;
            } else {
                consecutive_no_save_pages = 0;
                if let Some(page_cursor) = page.cursor.as_deref().filter(|c| !c.is_empty()) {
                    let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
                    ScrapeCursors::new(&mut conn)
                        .upsert(game.app_id, &params_hash, page_cursor)
                        .await?;
                }
            }

            self.progress.log(format!(
                "Fetched {} reviews (saved {saved_this_batch}) ({}/{} total)",
                page.reviews.len(),
                self.status().current_game_scraped,
                self.status().current_game_total,
            ));

            if self.progress.stop_requested() {
                self.progress.log("Stopping scrape after current request");
                break;
            }
            if page.reviews.is_empty() {
                break;
            }
            if remaining_needed.is_some_and(|r| r <= 0) {
                break;
            }

            // Several duplicate pages in a row from the newest end: jump to
            // the cursor saved by the previous run instead of re-walking.
            if consecutive_no_save_pages >= DUPLICATE_PAGE_LIMIT && !used_saved_cursor {
                if let Some(saved) = saved_cursor.as_ref().filter(|c| **c != cursor) {
                    self.progress.log(format!(
                        "Detected {consecutive_no_save_pages} duplicate pages; jumping to saved cursor for {}.",
                        game.name
                    ));
                    cursor = saved.clone();
                    consecutive_no_save_pages = 0;
                    used_saved_cursor = true;
                    tokio::time::sleep(settings.rate_limit_delay()).await;
                    continue;
                }
            }

            if let Some(next) = page.cursor.filter(|c| !c.is_empty()) {
                cursor = next;
            }
            tokio::time::sleep(settings.rate_limit_delay()).await;
        }

        if no_new_found {
            self.progress.log(format!(
                "Finished: skipped scraping for {} (no new reviews). Saved {saved_count} new reviews in this run.",
                game.name
            ));
        } else {
            self.progress.log(format!(
                "Scrape complete for {} (saved {saved_count} new reviews)",
                game.name
            ));
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Games::new(&mut conn)
            .touch_last_scraped(game.app_id, Utc::now().naive_utc())
            .await?;
        Ok(())
    }

    /// Apply filters and persist one page of reviews inside a single
    /// transaction. Integrity violations discard the batch (partial count
    /// is still reported); the run continues.
    async fn save_reviews(
        &self,
        app_id: AppId,
        reviews: &[SteamReview],
        settings: &ScrapeSettings,
        threshold_start: Option<NaiveDateTime>,
        max_to_save: Option<i64>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let outcome = {
            let conn = tx.acquire().await.map_err(DbError::from)?;
            Self::persist_batch(conn, app_id, reviews, settings, threshold_start, max_to_save).await?
        };
        if outcome.rolled_back {
            tx.rollback().await.map_err(DbError::from)?;
        } else {
            tx.commit().await.map_err(DbError::from)?;
        }
        Ok(outcome.saved)
    }

    async fn persist_batch(
        conn: &mut SqliteConnection,
        app_id: AppId,
        reviews: &[SteamReview],
        settings: &ScrapeSettings,
        threshold_start: Option<NaiveDateTime>,
        max_to_save: Option<i64>,
    ) -> Result<BatchOutcome> {
        let mut repo = Reviews::new(conn);
        let mut saved: i64 = 0;

        for raw in reviews {
            if max_to_save.is_some_and(|cap| saved >= cap) {
                break;
            }
            let Some(review_id) = raw.review_id() else {
                continue;
            };
            // Reviews without a timestamp cannot be placed in the window.
            let Some(review_date) = raw.timestamp_created.and_then(naive_utc_from_unix) else {
                continue;
            };

            let playtime_minutes = raw
                .author
                .as_ref()
                .and_then(|a| a.playtime_forever)
                .unwrap_or(0.0);
            let playtime_hours = playtime_minutes / 60.0;
            let language = raw
                .language
                .clone()
                .unwrap_or_else(|| settings.language.clone())
                .to_lowercase();
            let early_access = raw.written_during_early_access;
            let received_for_free = raw.received_for_free;

            if threshold_start.is_some_and(|t| review_date < t) {
                continue;
            }
            if settings.end_date.is_some_and(|end| review_date > end) {
                continue;
            }
            if !settings.language.is_empty() && language != settings.language {
                continue;
            }
            if !settings.early_access.allows(early_access) {
                continue;
            }
            if !settings.received_for_free.allows(received_for_free) {
                continue;
            }
            if settings.min_playtime.is_some_and(|min| playtime_hours < min) {
                continue;
            }
            if settings.max_playtime.is_some_and(|max| playtime_hours > max) {
                continue;
            }

            if repo.exists(&review_id).await? {
                continue;
            }

            let request = ReviewCreateDBRequest {
                review_id,
                app_id,
                review_text: raw.review.clone().unwrap_or_default(),
                review_date,
                playtime_hours: Some(playtime_hours),
                review_type: if raw.voted_up { "positive" } else { "negative" }.to_string(),
                language,
                early_access,
                received_for_free,
                timestamp_updated: raw.timestamp_updated.and_then(naive_utc_from_unix),
                votes_helpful: raw.votes_helpful,
                weighted_vote_score: raw.weighted_score(),
                comment_count: raw.comment_count,
                steam_purchase: raw.steam_purchase,
                num_games_owned: raw.author.as_ref().and_then(|a| a.num_games_owned),
                num_reviews: raw.author.as_ref().and_then(|a| a.num_reviews),
                playtime_last_two_weeks: raw.author.as_ref().and_then(|a| a.playtime_last_two_weeks),
                last_played: raw
                    .author
                    .as_ref()
                    .and_then(|a| a.last_played)
                    .and_then(naive_utc_from_unix),
            };

            match repo.create(&request).await {
                Ok(()) => saved += 1,
                Err(e) if e.is_integrity_violation() => {
                    return Ok(BatchOutcome {
                        saved,
                        rolled_back: true,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(BatchOutcome {
            saved,
            rolled_back: false,
        })
    }
}
