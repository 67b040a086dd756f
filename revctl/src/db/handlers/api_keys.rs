//! Database repository for provider credentials.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::handlers::repository::Repository;
use crate::db::models::api_keys::{ApiKey, ApiKeyCreateDBRequest, ApiKeyUpdateDBRequest};
use crate::types::ApiKeyId;

pub struct ApiKeys<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for ApiKeys<'c> {
    type CreateRequest = ApiKeyCreateDBRequest;
    type UpdateRequest = ApiKeyUpdateDBRequest;
    type Response = ApiKey;
    type Id = ApiKeyId;

    #[instrument(skip(self, request), fields(provider = %request.provider), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (provider, encrypted_key, masked_key, name, notes)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&request.provider)
        .bind(&request.encrypted_key)
        .bind(&request.masked_key)
        .bind(&request.name)
        .bind(&request.notes)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(key)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(key)
    }

    #[instrument(skip(self), err)]
    async fn list(&mut self) -> Result<Vec<Self::Response>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys ORDER BY provider ASC, name ASC",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(keys)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys
            SET provider = COALESCE(?, provider),
                encrypted_key = COALESCE(?, encrypted_key),
                masked_key = COALESCE(?, masked_key),
                name = COALESCE(?, name),
                notes = COALESCE(?, notes),
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&request.provider)
        .bind(&request.encrypted_key)
        .bind(&request.masked_key)
        .bind(&request.name)
        .bind(&request.notes)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(key)
    }
}

impl<'c> ApiKeys<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// First stored credential for a provider, used at dispatch time.
    #[instrument(skip(self), err)]
    pub async fn first_for_provider(&mut self, provider: &str) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE provider = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(provider)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(key)
    }
}
