//! Application error hierarchy.
//!
//! [`Error`] covers the engine-level failure cases; database errors are
//! wrapped from [`DbError`] so callers can distinguish constraint
//! violations from validation and upstream failures.

use crate::db::errors::DbError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Operation conflicts with current state (e.g. a run is already active)
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// No stored credential for the requested provider
    #[error("No API key found for provider '{provider}'")]
    NoCredential { provider: String },

    /// Credential vault failure (key material or cipher error)
    #[error("Vault error: {message}")]
    Vault { message: String },

    /// Upstream HTTP failure
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// JSON serialization/deserialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Filesystem failure (prompt files, vault key file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict { message: message.into() }
    }

    pub fn vault(message: impl Into<String>) -> Self {
        Error::Vault { message: message.into() }
    }
}

/// Type alias for engine operation results
pub type Result<T> = std::result::Result<T, Error>;
