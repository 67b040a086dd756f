//! Polymorphic interface over LLM backends.
//!
//! [`Provider`] is the seam between the orchestrator and concrete
//! backends: batch-oriented providers override `analyze_batch`, while the
//! default implementation loops `analyze_single` per input and reports
//! per-item progress through the optional callback. Adapters keep errors
//! as per-item response values so a batch always yields exactly
//! `|inputs|` entries.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::OpenAiConfig;
use crate::crypto::Vault;
use crate::db::errors::DbError;
use crate::db::handlers::ApiKeys;
use crate::errors::{Error, Result};

pub use openai::OpenAiProvider;

/// Progress callback: `(completed, total)` within the current batch.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Requested reasoning depth, forwarded to providers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(Error::bad_request(format!("invalid reasoning effort '{other}'"))),
        }
    }
}

/// Full prompt for one work unit.
pub fn compose_prompt(prompt: &str, input: &str) -> String {
    format!("{prompt}\n\nReview:\n{input}")
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Analyze a batch of inputs. The returned vector is aligned with
    /// `inputs` (same length, same order). The default implementation
    /// loops [`Self::analyze_single`] and invokes `progress` per item.
    async fn analyze_batch(
        &self,
        inputs: &[String],
        prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
        _completion_window: &str,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<Value>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let output = self
                .analyze_single(&compose_prompt(prompt, input), model, reasoning)
                .await?;
            outputs.push(output);
            if let Some(progress) = &progress {
                progress(index + 1, inputs.len());
            }
        }
        Ok(outputs)
    }

    /// Analyze one fully composed prompt.
    async fn analyze_single(
        &self,
        full_prompt: &str,
        model: &str,
        reasoning: Option<ReasoningEffort>,
    ) -> Result<Value>;
}

/// Instantiate the provider registered under `name`, decrypting its
/// stored credential through the vault.
pub async fn provider_for_name(
    pool: &SqlitePool,
    vault: &Vault,
    config: &OpenAiConfig,
    name: &str,
) -> Result<Arc<dyn Provider>> {
    let stored = {
        let mut conn = pool.acquire().await.map_err(DbError::from)?;
        ApiKeys::new(&mut conn).first_for_provider(name).await?
    };
    let stored = stored.ok_or_else(|| Error::NoCredential {
        provider: name.to_string(),
    })?;
    let api_key = vault.decrypt(&stored.encrypted_key)?;

    match name.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(api_key, config)?)),
        other => Err(Error::bad_request(format!("Unknown provider '{other}'"))),
    }
}
