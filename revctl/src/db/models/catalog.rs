//! Title catalog rows (`steam_apps` table) used for local name search.

use serde::Serialize;
use sqlx::FromRow;

use crate::types::AppId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct CatalogApp {
    pub app_id: AppId,
    pub name: String,
}

/// One applist entry staged for bulk upsert into the catalog.
#[derive(Debug, Clone)]
pub struct CatalogUpsert {
    pub app_id: AppId,
    pub name: String,
    /// Original upstream entry, retained for diagnostics
    pub raw: Option<String>,
}
