//! Database repository for the harvested title set.

use chrono::NaiveDateTime;
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::handlers::repository::Repository;
use crate::db::models::games::{Game, GameCreateDBRequest};
use crate::types::AppId;

pub struct Games<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Games<'c> {
    type CreateRequest = GameCreateDBRequest;
    type UpdateRequest = GameCreateDBRequest;
    type Response = Game;
    type Id = AppId;

    /// Adding an already-present title is a no-op returning the existing row.
    #[instrument(skip(self, request), fields(app_id = request.app_id), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        if let Some(existing) = self.get_by_id(request.app_id).await? {
            return Ok(existing);
        }

        let game = sqlx::query_as::<_, Game>(
            r#"
            INSERT INTO games (app_id, name)
            VALUES (?, ?)
            RETURNING *
            "#,
        )
        .bind(request.app_id)
        .bind(&request.name)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(game)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let game = sqlx::query_as::<_, Game>("SELECT * FROM games WHERE app_id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(game)
    }

    /// Active titles, ordered by name for stable scrape ordering.
    #[instrument(skip(self), err)]
    async fn list(&mut self) -> Result<Vec<Self::Response>> {
        let games = sqlx::query_as::<_, Game>("SELECT * FROM games ORDER BY name ASC")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(games)
    }

    /// Deleting a title cascades to its reviews.
    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM games WHERE app_id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let game = sqlx::query_as::<_, Game>(
            "UPDATE games SET name = ? WHERE app_id = ? RETURNING *",
        )
        .bind(&request.name)
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(game)
    }
}

impl<'c> Games<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Case-insensitive partial name match or exact app id match.
    #[instrument(skip(self), err)]
    pub async fn search_local(&mut self, query: &str) -> Result<Vec<Game>> {
        let trimmed = query.trim();
        let like = format!("%{}%", trimmed.to_lowercase());
        let numeric: Option<AppId> = trimmed.parse().ok();

        let games = sqlx::query_as::<_, Game>(
            r#"
            SELECT * FROM games
            WHERE lower(name) LIKE ? OR app_id = ?
            ORDER BY name ASC
            "#,
        )
        .bind(like)
        .bind(numeric.unwrap_or(-1))
        .fetch_all(&mut *self.db)
        .await?;
        Ok(games)
    }

    /// Stamp the end of a scrape pass over a title.
    #[instrument(skip(self), err)]
    pub async fn touch_last_scraped(&mut self, app_id: AppId, at: NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE games SET last_scraped_at = ? WHERE app_id = ?")
            .bind(at)
            .bind(app_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
