//! Stored provider credentials (`api_keys` table).
//!
//! `encrypted_key` is the vault-sealed token; `masked_key` is the
//! display-only suffix. Plaintext never lands in this table.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

use crate::types::ApiKeyId;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub provider: String,
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub masked_key: Option<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// Request to store a credential. `encrypted_key` must already be sealed
/// by the vault; `masked_key` is derived from the plaintext by the caller.
#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub provider: String,
    pub encrypted_key: String,
    pub masked_key: Option<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
}

/// Partial update of a stored credential.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdateDBRequest {
    pub provider: Option<String>,
    pub encrypted_key: Option<String>,
    pub masked_key: Option<String>,
    pub name: Option<String>,
    pub notes: Option<String>,
}
