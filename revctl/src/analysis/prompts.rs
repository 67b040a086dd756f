//! Active-prompt loading.
//!
//! The settings key `prompts:active` names a UTF-8 file inside the
//! configured prompts directory. A missing pointer falls back to
//! `prompt.txt`; a missing file yields an empty prompt rather than
//! failing the job.

use sqlx::SqliteConnection;
use std::path::Path;

use crate::db::handlers::Settings;
use crate::errors::Result;

pub const ACTIVE_PROMPT_KEY: &str = "prompts:active";
pub const DEFAULT_PROMPT_FILE: &str = "prompt.txt";

pub async fn load_active_prompt(conn: &mut SqliteConnection, prompts_dir: &Path) -> Result<String> {
    let name = Settings::new(conn)
        .get(ACTIVE_PROMPT_KEY)
        .await?
        .map(|setting| setting.value)
        .unwrap_or_else(|| DEFAULT_PROMPT_FILE.to_string());

    let path = prompts_dir.join(name);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}
