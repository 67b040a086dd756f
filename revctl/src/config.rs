//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment
//! variable overrides. Sources are merged in order (later overrides
//! earlier):
//!
//! 1. Built-in defaults
//! 2. YAML config file (default: `revctl.yaml`)
//! 3. Environment variables prefixed with `REVCTL_` (use `__` for nesting,
//!    e.g. `REVCTL_STEAM__STORE_BASE_URL`)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{Error, Result};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// SQLite connection URL, e.g. `sqlite://revctl.db`
    pub database_url: String,
    /// Base64-encoded 256-bit vault key. When unset, the key is read from
    /// `vault_key_file` (generated and persisted on first use).
    pub secret_key: Option<String>,
    /// Fallback location for the vault key
    pub vault_key_file: PathBuf,
    /// Directory holding prompt files for analysis jobs
    pub prompts_dir: PathBuf,
    /// Upstream store endpoints
    pub steam: SteamConfig,
    /// Primary LLM provider endpoints and batch behavior
    pub openai: OpenAiConfig,
}

/// Upstream store API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SteamConfig {
    /// Storefront base URL (reviews, appdetails, storesearch)
    pub store_base_url: String,
    /// Web API base URL (applist)
    pub api_base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

/// Primary provider (batch-oriented) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Provider-side deadline for asynchronous batch jobs
    pub completion_window: String,
    /// Batch status poll interval in seconds
    pub poll_interval_seconds: u64,
    /// Wall-clock deadline for batch polling in seconds
    pub poll_deadline_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://revctl.db".to_string(),
            secret_key: None,
            vault_key_file: PathBuf::from(".revctl_vault_key"),
            prompts_dir: PathBuf::from("prompts"),
            steam: SteamConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            store_base_url: "https://store.steampowered.com".to_string(),
            api_base_url: "https://api.steampowered.com".to_string(),
            request_timeout_seconds: 20,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            completion_window: "24h".to_string(),
            poll_interval_seconds: 3,
            poll_deadline_seconds: 600,
        }
    }
}

impl Config {
    /// Load configuration from the given YAML file (if present) and the
    /// environment.
    pub fn load(config_file: &str) -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_file))
            .merge(Env::prefixed("REVCTL_").split("__"))
            .extract()
            .map_err(|e| Error::BadRequest {
                message: format!("invalid configuration: {e}"),
            })?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.steam.request_timeout_seconds)
    }
}
