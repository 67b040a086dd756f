//! Upstream store client behavior: realtime search and review pages.

mod common;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{review_page, test_env, upstream_review};
use revctl::steam::SteamClient;

#[tokio::test]
async fn numeric_query_resolves_app_details() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .and(query_param("appids", "620"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "620": {"success": true, "data": {"name": "Portal 2"}}
        })))
        .mount(&server)
        .await;

    let client = SteamClient::new(&env.config.steam).unwrap();
    let results = client.search("620", 0, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].app_id, 620);
    assert_eq!(results[0].name, "Portal 2");
}

#[tokio::test]
async fn text_search_pages_until_count_is_met() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    // The upstream caps per-request results; the client pages with start
    // offsets until the requested count is gathered.
    let first: Vec<_> = (0..50)
        .map(|i| json!({"id": 1000 + i, "name": format!("Game {i}")}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/storesearch/"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": first})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/storesearch/"))
        .and(query_param("start", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": 2000, "name": "Game 50"},
                {"id": 2001, "name": "  "},
            ]
        })))
        .mount(&server)
        .await;

    let client = SteamClient::new(&env.config.steam).unwrap();
    let results = client.search("game", 0, 60).await.unwrap();
    // 50 from the first page, one from the second; the blank name is
    // dropped.
    assert_eq!(results.len(), 51);
    assert_eq!(results[50].app_id, 2000);
}

#[tokio::test]
async fn review_page_tolerates_missing_fields() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;

    let mut sparse = upstream_review(1, 100, false, false, "english");
    sparse.as_object_mut().unwrap().remove("author");
    let page = review_page(vec![sparse, json!({"recommendationid": 2})], 2, "next");
    Mock::given(method("GET"))
        .and(path("/appreviews/99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page))
        .mount(&server)
        .await;

    let client = SteamClient::new(&env.config.steam).unwrap();
    let page = client.fetch_review_page(99, "english", "*").await.unwrap();
    assert_eq!(page.reviews.len(), 2);
    assert_eq!(page.query_summary.total(), 2);
    assert_eq!(page.cursor.as_deref(), Some("next"));
    assert_eq!(page.reviews[0].review_id().as_deref(), Some("1"));
    // Numeric ids come back as strings too.
    assert_eq!(page.reviews[1].review_id().as_deref(), Some("2"));
    assert!(page.reviews[1].timestamp_created.is_none());
}
