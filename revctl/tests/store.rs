//! Store-layer behavior: ownership, constraints, cursors, settings,
//! credentials and catalog search.

mod common;

use chrono::NaiveDate;
use wiremock::MockServer;

use common::{seed_game, seed_review, test_env};
use revctl::crypto::mask_key;
use revctl::db::errors::DbError;
use revctl::db::handlers::{ApiKeys, Catalog, Games, Repository, Reviews, ScrapeCursors, Settings};
use revctl::db::models::api_keys::{ApiKeyCreateDBRequest, ApiKeyUpdateDBRequest};
use revctl::db::models::catalog::CatalogUpsert;
use revctl::db::models::reviews::ReviewFilter;

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
}

#[tokio::test]
async fn deleting_a_game_cascades_to_its_reviews() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 1, "Owner").await;
    seed_review(&env.pool, 1, "r1", date(2024, 1, 1), "english").await;
    seed_review(&env.pool, 1, "r2", date(2024, 1, 2), "english").await;

    let mut conn = env.pool.acquire().await.unwrap();
    assert_eq!(Reviews::new(&mut conn).count_for_app(1).await.unwrap(), 2);

    assert!(Games::new(&mut conn).delete(1).await.unwrap());
    assert_eq!(Reviews::new(&mut conn).count_for_app(1).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_review_insert_is_a_unique_violation() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 2, "Dup").await;
    seed_review(&env.pool, 2, "same-id", date(2024, 1, 1), "english").await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut reviews = Reviews::new(&mut conn);
    assert!(reviews.exists(&"same-id".to_string()).await.unwrap());

    // Driving the same insert again must surface as an integrity
    // violation, which batch writers treat as roll-back-and-continue.
    let request = revctl::db::models::reviews::ReviewCreateDBRequest {
        review_id: "same-id".to_string(),
        app_id: 2,
        review_text: "again".to_string(),
        review_date: date(2024, 1, 1),
        playtime_hours: Some(1.0),
        review_type: "positive".to_string(),
        language: "english".to_string(),
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
    };
    let err = reviews.create(&request).await.unwrap_err();
    assert!(err.is_integrity_violation());
    assert!(matches!(err, DbError::UniqueViolation { .. }));
}

#[tokio::test]
async fn playtime_filter_round_trip() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 3, "Playtime").await;
    // seed_review stores playtime_hours = 2.0
    seed_review(&env.pool, 3, "p1", date(2024, 1, 1), "english").await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut reviews = Reviews::new(&mut conn);

    let in_range = ReviewFilter {
        app_id: Some(3),
        min_playtime: Some(1.0),
        max_playtime: Some(3.0),
        ..Default::default()
    };
    assert_eq!(reviews.count_matching(&in_range).await.unwrap(), 1);

    let below = ReviewFilter {
        app_id: Some(3),
        min_playtime: Some(2.5),
        ..Default::default()
    };
    assert_eq!(reviews.count_matching(&below).await.unwrap(), 0);

    let above = ReviewFilter {
        app_id: Some(3),
        max_playtime: Some(1.5),
        ..Default::default()
    };
    assert_eq!(reviews.count_matching(&above).await.unwrap(), 0);
}

#[tokio::test]
async fn cursors_are_namespaced_by_params_hash() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut cursors = ScrapeCursors::new(&mut conn);

    cursors.upsert(10, "hash-a", "cursor-a1").await.unwrap();
    cursors.upsert(10, "hash-b", "cursor-b1").await.unwrap();
    cursors.upsert(10, "hash-a", "cursor-a2").await.unwrap();

    let a = cursors.get(10, "hash-a").await.unwrap().unwrap();
    assert_eq!(a.cursor.as_deref(), Some("cursor-a2"));
    let b = cursors.get(10, "hash-b").await.unwrap().unwrap();
    assert_eq!(b.cursor.as_deref(), Some("cursor-b1"));
    assert!(cursors.get(11, "hash-a").await.unwrap().is_none());
}

#[tokio::test]
async fn settings_upsert_and_delete() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut settings = Settings::new(&mut conn);

    assert!(settings.get("prompts:active").await.unwrap().is_none());
    settings.upsert("prompts:active", "tone.txt").await.unwrap();
    settings.upsert("prompts:active", "sentiment.txt").await.unwrap();
    assert_eq!(
        settings.get("prompts:active").await.unwrap().unwrap().value,
        "sentiment.txt"
    );
    assert!(settings.delete("prompts:active").await.unwrap());
    assert!(!settings.delete("prompts:active").await.unwrap());
}

#[tokio::test]
async fn api_key_repository_round_trip() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let plaintext = "sk-test-abcdef123456";
    let encrypted = env.vault.encrypt(plaintext).unwrap();

    let mut conn = env.pool.acquire().await.unwrap();
    let mut keys = ApiKeys::new(&mut conn);
    let created = keys
        .create(&ApiKeyCreateDBRequest {
            provider: "openai".to_string(),
            encrypted_key: encrypted.clone(),
            masked_key: Some(mask_key(plaintext)),
            name: Some("primary".to_string()),
            notes: None,
        })
        .await
        .unwrap();

    // The stored blob is sealed; only the masked tail is display-ready.
    assert_ne!(created.encrypted_key, plaintext);
    assert_eq!(created.masked_key.as_deref(), Some("****123456"));
    assert_eq!(env.vault.decrypt(&created.encrypted_key).unwrap(), plaintext);

    let fetched = keys.first_for_provider("openai").await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);

    let updated = keys
        .update(
            created.id,
            &ApiKeyUpdateDBRequest {
                name: Some("rotated".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("rotated"));
    assert_eq!(updated.encrypted_key, encrypted);

    assert!(keys.delete(created.id).await.unwrap());
    assert!(keys.first_for_provider("openai").await.unwrap().is_none());
}

#[tokio::test]
async fn catalog_search_numeric_prefix_and_substring() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut catalog = Catalog::new(&mut conn);
    catalog
        .upsert_batch(&[
            CatalogUpsert { app_id: 220, name: "Half-Life 2".to_string(), raw: None },
            CatalogUpsert { app_id: 440, name: "Team Fortress 2".to_string(), raw: None },
            CatalogUpsert { app_id: 570, name: "Dota 2".to_string(), raw: None },
        ])
        .await
        .unwrap();
    catalog.rebuild_fts().await.unwrap();

    // Numeric query: exact id lookup.
    let (rows, total) = catalog.search("440", 0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].name, "Team Fortress 2");

    // Prefix match through the FTS index.
    let (rows, total) = catalog.search("half", 0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].app_id, 220);

    // Substring fallback (no token starts with "ortress").
    let (rows, _) = catalog.search("ortress", 0, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].app_id, 440);

    // No match.
    let (rows, total) = catalog.search("zzzz", 0, 10).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn catalog_search_degrades_without_fts_index() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut catalog = Catalog::new(&mut conn);
    catalog
        .upsert_batch(&[CatalogUpsert { app_id: 730, name: "Counter-Strike 2".to_string(), raw: None }])
        .await
        .unwrap();

    // No rebuild_fts: the MATCH query fails and search falls back to LIKE.
    let (rows, total) = catalog.search("counter", 0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].app_id, 730);
}

#[tokio::test]
async fn local_game_search_matches_name_or_id() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 400, "Portal").await;
    seed_game(&env.pool, 620, "Portal 2").await;

    let mut conn = env.pool.acquire().await.unwrap();
    let mut games = Games::new(&mut conn);

    let by_name = games.search_local("portal").await.unwrap();
    assert_eq!(by_name.len(), 2);

    let by_id = games.search_local("620").await.unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].name, "Portal 2");
}
