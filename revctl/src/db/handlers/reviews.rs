//! Database repository for harvested reviews.
//!
//! Review queries share one filter grammar ([`ReviewFilter`]) between the
//! scrape resume check, the analysis preview and work-unit selection, so
//! all three see the same row set for the same predicates.

use chrono::NaiveDateTime;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::reviews::{FilterMode, Review, ReviewCreateDBRequest, ReviewFilter};
use crate::types::{AppId, ReviewId};

pub struct Reviews<'c> {
    db: &'c mut SqliteConnection,
}

fn apply_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ReviewFilter) {
    if let Some(app_id) = filter.app_id {
        qb.push(" AND app_id = ").push_bind(app_id);
    }
    if let Some(start) = filter.start_date {
        qb.push(" AND review_date >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND review_date <= ").push_bind(end);
    }
    if let Some(review_type) = &filter.review_type {
        qb.push(" AND review_type = ").push_bind(review_type.clone());
    }
    if let Some(min) = filter.min_playtime {
        qb.push(" AND playtime_hours >= ").push_bind(min);
    }
    if let Some(max) = filter.max_playtime {
        qb.push(" AND playtime_hours <= ").push_bind(max);
    }
    match filter.early_access {
        FilterMode::Include => {}
        FilterMode::Exclude => {
            qb.push(" AND early_access = 0");
        }
        FilterMode::Only => {
            qb.push(" AND early_access = 1");
        }
    }
    match filter.received_for_free {
        FilterMode::Include => {}
        FilterMode::Exclude => {
            qb.push(" AND received_for_free = 0");
        }
        FilterMode::Only => {
            qb.push(" AND received_for_free = 1");
        }
    }
    if let Some(language) = &filter.language {
        if !language.is_empty() && language != "Any" {
            qb.push(" AND lower(language) = ").push_bind(language.to_lowercase());
        }
    }
}

impl<'c> Reviews<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Insert one review. Duplicate ids surface as a unique violation;
    /// callers deciding on idempotence check [`Self::exists`] first.
    #[instrument(skip(self, request), fields(review_id = %request.review_id), err)]
    pub async fn create(&mut self, request: &ReviewCreateDBRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reviews (
                review_id, app_id, review_text, review_date, playtime_hours,
                review_type, language, early_access, received_for_free,
                timestamp_updated, votes_helpful, weighted_vote_score,
                comment_count, steam_purchase, num_games_owned, num_reviews,
                playtime_last_two_weeks, last_played
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.review_id)
        .bind(request.app_id)
        .bind(&request.review_text)
        .bind(request.review_date)
        .bind(request.playtime_hours)
        .bind(&request.review_type)
        .bind(&request.language)
        .bind(request.early_access)
        .bind(request.received_for_free)
        .bind(request.timestamp_updated)
        .bind(request.votes_helpful)
        .bind(request.weighted_vote_score)
        .bind(request.comment_count)
        .bind(request.steam_purchase)
        .bind(request.num_games_owned)
        .bind(request.num_reviews)
        .bind(request.playtime_last_two_weeks)
        .bind(request.last_played)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn exists(&mut self, review_id: &ReviewId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM reviews WHERE review_id = ?")
                .bind(review_id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(found.is_some())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, review_id: &ReviewId) -> Result<Option<Review>> {
        let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE review_id = ?")
            .bind(review_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(review)
    }

    /// Count stored reviews matching the filter.
    #[instrument(skip(self, filter), err)]
    pub async fn count_matching(&mut self, filter: &ReviewFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM reviews WHERE 1=1");
        apply_filter(&mut qb, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    /// Newest stored `review_date` among rows matching the filter. Used as
    /// the resume floor for a scrape run.
    #[instrument(skip(self, filter), err)]
    pub async fn latest_review_date(&mut self, filter: &ReviewFilter) -> Result<Option<NaiveDateTime>> {
        let mut qb = QueryBuilder::new("SELECT MAX(review_date) FROM reviews WHERE 1=1");
        apply_filter(&mut qb, filter);
        let latest: Option<NaiveDateTime> =
            qb.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(latest)
    }

    /// Page of matching reviews, newest first.
    #[instrument(skip(self, filter), err)]
    pub async fn page(&mut self, filter: &ReviewFilter) -> Result<Vec<Review>> {
        let mut qb = QueryBuilder::new("SELECT * FROM reviews WHERE 1=1");
        apply_filter(&mut qb, filter);
        qb.push(" ORDER BY review_date DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = filter.offset {
                qb.push(" OFFSET ").push_bind(offset);
            }
        }
        let reviews = qb
            .build_query_as::<Review>()
            .fetch_all(&mut *self.db)
            .await?;
        Ok(reviews)
    }

    #[instrument(skip(self), err)]
    pub async fn count_for_app(&mut self, app_id: AppId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE app_id = ?")
            .bind(app_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
