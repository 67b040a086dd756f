//! Database repository for the key/value settings store.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::settings::Setting;

pub struct Settings<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Settings<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, key: &str) -> Result<Option<Setting>> {
        let setting = sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(setting)
    }

    #[instrument(skip(self, value), err)]
    pub async fn upsert(&mut self, key: &str, value: &str) -> Result<Setting> {
        let setting = sqlx::query_as::<_, Setting>(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().naive_utc())
        .fetch_one(&mut *self.db)
        .await?;
        Ok(setting)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
