//! Database repository for the title catalog and its full-text index.
//!
//! Search strategy: exact app-id lookup for numeric queries, FTS5 prefix
//! match on the normalized query, then a case-insensitive substring LIKE
//! fallback. The FTS shadow table is created on demand so environments
//! without the FTS5 module degrade to the LIKE path instead of failing.

use sqlx::SqliteConnection;
use tracing::{instrument, warn};

use crate::db::errors::Result;
use crate::db::models::catalog::{CatalogApp, CatalogUpsert};
use crate::types::AppId;

pub struct Catalog<'c> {
    db: &'c mut SqliteConnection,
}

fn normalize_text(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect()
}

impl<'c> Catalog<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Upsert a batch of applist entries.
    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[CatalogUpsert]) -> Result<()> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO steam_apps (app_id, name, raw, last_seen)
                VALUES (?, ?, ?, datetime('now'))
                ON CONFLICT (app_id)
                DO UPDATE SET name = excluded.name, raw = excluded.raw, last_seen = excluded.last_seen
                "#,
            )
            .bind(row.app_id)
            .bind(&row.name)
            .bind(&row.raw)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    /// Rebuild the FTS index from the catalog table. Called after bulk
    /// upserts; errors here signal index or file corruption to the caller.
    #[instrument(skip(self), err)]
    pub async fn rebuild_fts(&mut self) -> Result<()> {
        sqlx::query("CREATE VIRTUAL TABLE IF NOT EXISTS steam_apps_fts USING fts5(name)")
            .execute(&mut *self.db)
            .await?;
        sqlx::query("DELETE FROM steam_apps_fts")
            .execute(&mut *self.db)
            .await?;
        sqlx::query("INSERT INTO steam_apps_fts (rowid, name) SELECT app_id, name FROM steam_apps")
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Search the catalog. Returns `(rows, estimated_total)`.
    #[instrument(skip(self), err)]
    pub async fn search(&mut self, query: &str, start: i64, count: i64) -> Result<(Vec<CatalogApp>, i64)> {
        let q = query.trim();
        if q.is_empty() {
            return Ok((Vec::new(), 0));
        }

        // Numeric queries are exact id lookups.
        if let Ok(app_id) = q.parse::<AppId>() {
            let rows = sqlx::query_as::<_, CatalogApp>(
                "SELECT app_id, name FROM steam_apps WHERE app_id = ? LIMIT ?",
            )
            .bind(app_id)
            .bind(count)
            .fetch_all(&mut *self.db)
            .await?;
            if !rows.is_empty() {
                let total = rows.len() as i64;
                return Ok((rows, total));
            }
        }

        let norm = normalize_text(q);
        let fts_query = format!("{}*", if norm.is_empty() { q } else { &norm });

        // Prefer FTS prefix matching; fall through to LIKE when the MATCH
        // query fails (index absent or corrupt).
        match sqlx::query_as::<_, CatalogApp>(
            r#"
            SELECT rowid AS app_id, name FROM steam_apps_fts
            WHERE steam_apps_fts MATCH ?
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&fts_query)
        .bind(count)
        .bind(start)
        .fetch_all(&mut *self.db)
        .await
        {
            Ok(rows) if !rows.is_empty() => {
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM steam_apps_fts WHERE steam_apps_fts MATCH ?",
                )
                .bind(&fts_query)
                .fetch_one(&mut *self.db)
                .await
                .unwrap_or(rows.len() as i64);
                return Ok((rows, total));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "FTS search failed, falling back to LIKE");
            }
        }

        let like = format!("%{}%", if norm.is_empty() { q.to_lowercase() } else { norm });
        let rows = sqlx::query_as::<_, CatalogApp>(
            r#"
            SELECT app_id, name FROM steam_apps
            WHERE lower(name) LIKE ?
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&like)
        .bind(count)
        .bind(start)
        .fetch_all(&mut *self.db)
        .await?;

        if rows.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM steam_apps WHERE lower(name) LIKE ?")
                .bind(&like)
                .fetch_one(&mut *self.db)
                .await
                .unwrap_or(rows.len() as i64);
        Ok((rows, total))
    }
}
