//! Background applist backfill for the title catalog.
//!
//! Fetches the full applist from the store, bulk-upserts it into
//! `steam_apps` in batches while exposing a readable status, then
//! rebuilds the full-text index. A database error during the rebuild is
//! treated as file corruption: the database is moved aside with a
//! timestamped suffix, recreated, re-populated and the rebuild retried
//! once.

use chrono::{NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::db;
use crate::db::errors::DbError;
use crate::db::handlers::Catalog;
use crate::db::models::catalog::CatalogUpsert;
use crate::errors::Result;
use crate::steam::{AppEntry, SteamClient};

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillState {
    Idle,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillStatus {
    pub state: BackfillState,
    pub total: i64,
    pub processed: i64,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub error: Option<String>,
}

impl Default for BackfillStatus {
    fn default() -> Self {
        Self {
            state: BackfillState::Idle,
            total: 0,
            processed: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// Non-blocking catalog population service. The service owns its own
/// connection to the database file so the corruption recovery path can
/// swap the file out from under it.
pub struct CatalogBackfillService {
    steam: SteamClient,
    db_path: PathBuf,
    batch_size: usize,
    status: Arc<RwLock<BackfillStatus>>,
}

impl CatalogBackfillService {
    pub fn new(steam: SteamClient, db_path: PathBuf) -> Self {
        Self {
            steam,
            db_path,
            batch_size: DEFAULT_BATCH_SIZE,
            status: Arc::new(RwLock::new(BackfillStatus::default())),
        }
    }

    pub fn status(&self) -> BackfillStatus {
        self.status.read().clone()
    }

    /// Kick off a background run; a no-op when one is already running.
    pub fn start_background(self: &Arc<Self>) {
        {
            let mut status = self.status.write();
            if status.state == BackfillState::Running {
                return;
            }
            *status = BackfillStatus {
                state: BackfillState::Running,
                started_at: Some(Utc::now().naive_utc()),
                ..BackfillStatus::default()
            };
        }

        let service = self.clone();
        tokio::spawn(async move {
            match service.run().await {
                Ok(()) => {
                    let mut status = service.status.write();
                    status.state = BackfillState::Done;
                    status.finished_at = Some(Utc::now().naive_utc());
                }
                Err(e) => {
                    error!(error = %e, "Catalog backfill failed");
                    let mut status = service.status.write();
                    status.state = BackfillState::Failed;
                    status.error = Some(e.to_string());
                    status.finished_at = Some(Utc::now().naive_utc());
                }
            }
        });
    }

    #[instrument(skip(self), err)]
    async fn run(&self) -> Result<()> {
        let apps = self.steam.fetch_app_list().await?;
        self.status.write().total = apps.len() as i64;
        info!(count = apps.len(), "Fetched applist");

        let url = format!("sqlite://{}", self.db_path.display());
        let pool = db::connect_and_migrate(&url).await?;

        self.upsert_all(&pool, &apps).await?;

        let rebuild = {
            let mut conn = pool.acquire().await.map_err(DbError::from)?;
            Catalog::new(&mut conn).rebuild_fts().await
        };
        if let Err(e) = rebuild {
            warn!(error = %e, "FTS rebuild failed, recreating catalog database");
            pool.close().await;
            self.recover_corrupt_database(&url, &apps).await?;
        }
        Ok(())
    }

    async fn upsert_all(&self, pool: &SqlitePool, apps: &[AppEntry]) -> Result<()> {
        for chunk in apps.chunks(self.batch_size) {
            let rows: Vec<CatalogUpsert> = chunk
                .iter()
                .map(|entry| CatalogUpsert {
                    app_id: entry.app_id,
                    name: entry.name.clone(),
                    raw: serde_json::to_string(&serde_json::json!({
                        "app_id": entry.app_id,
                        "name": entry.name,
                    }))
                    .ok(),
                })
                .collect();
            let mut conn = pool.acquire().await.map_err(DbError::from)?;
            Catalog::new(&mut conn).upsert_batch(&rows).await?;
            self.status.write().processed += rows.len() as i64;
        }
        Ok(())
    }

    /// Move the corrupt database aside, recreate it from the fetched
    /// applist and retry the index rebuild once.
    async fn recover_corrupt_database(&self, url: &str, apps: &[AppEntry]) -> Result<()> {
        let suffix = Utc::now().format("%Y%m%d%H%M%S");
        let corrupt_path = PathBuf::from(format!("{}.corrupt.{suffix}", self.db_path.display()));
        std::fs::rename(&self.db_path, &corrupt_path)?;
        warn!(moved_to = %corrupt_path.display(), "Moved corrupt database aside");

        let pool = db::connect_and_migrate(url).await?;
        self.status.write().processed = 0;
        self.upsert_all(&pool, apps).await?;

        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        Catalog::new(&mut conn).rebuild_fts().await?;
        Ok(())
    }
}
