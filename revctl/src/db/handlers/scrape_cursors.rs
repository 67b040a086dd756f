//! Database repository for saved scrape cursors.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::scrape_cursors::ScrapeCursor;
use crate::types::AppId;

pub struct ScrapeCursors<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> ScrapeCursors<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Saved cursor for `(app_id, params_hash)`, if any.
    #[instrument(skip(self, params_hash), err)]
    pub async fn get(&mut self, app_id: AppId, params_hash: &str) -> Result<Option<ScrapeCursor>> {
        let row = sqlx::query_as::<_, ScrapeCursor>(
            "SELECT * FROM scrape_cursors WHERE app_id = ? AND params_hash = ?",
        )
        .bind(app_id)
        .bind(params_hash)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row)
    }

    /// Create or advance the saved cursor for `(app_id, params_hash)`.
    #[instrument(skip(self, params_hash, cursor), err)]
    pub async fn upsert(&mut self, app_id: AppId, params_hash: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scrape_cursors (app_id, params_hash, cursor, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (app_id, params_hash)
            DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
            "#,
        )
        .bind(app_id)
        .bind(params_hash)
        .bind(cursor)
        .bind(Utc::now().naive_utc())
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }
}
