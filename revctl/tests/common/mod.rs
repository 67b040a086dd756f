//! Shared helpers for integration tests: scratch databases, config
//! pointed at mock upstreams, and seed data builders.
#![allow(dead_code)]

use chrono::NaiveDateTime;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use revctl::Config;
use revctl::config::{OpenAiConfig, SteamConfig};
use revctl::crypto::{Vault, mask_key};
use revctl::db;
use revctl::db::handlers::{ApiKeys, Games, Repository, Reviews};
use revctl::db::models::api_keys::ApiKeyCreateDBRequest;
use revctl::db::models::games::GameCreateDBRequest;
use revctl::db::models::reviews::ReviewCreateDBRequest;
use revctl::types::AppId;

/// Scratch environment: tempdir-backed database, prompts dir and vault
/// key, with all upstream base URLs pointing at the given mock server.
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub vault: Arc<Vault>,
}

pub async fn test_env(upstream_url: &str) -> TestEnv {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("test.db");
    let prompts_dir = dir.path().join("prompts");
    std::fs::create_dir_all(&prompts_dir).expect("prompts dir");
    std::fs::write(prompts_dir.join("prompt.txt"), "Summarize the review.").expect("prompt file");

    let config = Config {
        database_url: format!("sqlite://{}", db_path.display()),
        secret_key: None,
        vault_key_file: dir.path().join("vault_key"),
        prompts_dir,
        steam: SteamConfig {
            store_base_url: upstream_url.to_string(),
            api_base_url: upstream_url.to_string(),
            request_timeout_seconds: 5,
        },
        openai: OpenAiConfig {
            base_url: upstream_url.to_string(),
            completion_window: "24h".to_string(),
            poll_interval_seconds: 0,
            poll_deadline_seconds: 5,
        },
    };

    let pool = db::connect_and_migrate(&config.database_url)
        .await
        .expect("connect test db");
    let vault = Arc::new(Vault::open(&config).expect("open vault"));

    TestEnv {
        dir,
        pool,
        config: Arc::new(config),
        vault,
    }
}

pub async fn seed_game(pool: &SqlitePool, app_id: AppId, name: &str) {
    let mut conn = pool.acquire().await.unwrap();
    Games::new(&mut conn)
        .create(&GameCreateDBRequest {
            app_id,
            name: name.to_string(),
        })
        .await
        .unwrap();
}

pub async fn seed_review(
    pool: &SqlitePool,
    app_id: AppId,
    review_id: &str,
    review_date: NaiveDateTime,
    language: &str,
) {
    let mut conn = pool.acquire().await.unwrap();
    Reviews::new(&mut conn)
        .create(&ReviewCreateDBRequest {
            review_id: review_id.to_string(),
            app_id,
            review_text: format!("Review {review_id}"),
            review_date,
            playtime_hours: Some(2.0),
            review_type: "positive".to_string(),
            language: language.to_string(),
            early_access: false,
            received_for_free: false,
            timestamp_updated: None,
            votes_helpful: None,
            weighted_vote_score: None,
            comment_count: None,
            steam_purchase: None,
            num_games_owned: None,
            num_reviews: None,
            playtime_last_two_weeks: None,
            last_played: None,
        })
        .await
        .unwrap();
}

/// Store an encrypted provider credential the way the settings surface
/// would.
pub async fn seed_api_key(env: &TestEnv, provider: &str, plaintext: &str) {
    let encrypted = env.vault.encrypt(plaintext).unwrap();
    let mut conn = env.pool.acquire().await.unwrap();
    ApiKeys::new(&mut conn)
        .create(&ApiKeyCreateDBRequest {
            provider: provider.to_string(),
            encrypted_key: encrypted,
            masked_key: Some(mask_key(plaintext)),
            name: Some("test key".to_string()),
            notes: None,
        })
        .await
        .unwrap();
}

/// An upstream review payload in the store's wire shape.
pub fn upstream_review(id: i64, ts: i64, early: bool, free: bool, lang: &str) -> Value {
    json!({
        "recommendationid": id.to_string(),
        "timestamp_created": ts,
        "voted_up": true,
        "review": format!("Review {id}"),
        "language": lang,
        "written_during_early_access": early,
        "received_for_free": free,
        "author": {"playtime_forever": 120},
    })
}

pub fn review_page(reviews: Vec<Value>, total: i64, cursor: &str) -> Value {
    json!({
        "reviews": reviews,
        "query_summary": {"total_reviews": total},
        "cursor": cursor,
    })
}

/// A chat-completions style provider response.
pub fn chat_completion(content: &str) -> Value {
    json!({
        "choices": [{"message": {"content": content}}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7},
    })
}
