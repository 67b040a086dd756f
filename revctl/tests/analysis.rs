//! End-to-end analysis orchestration scenarios against a mocked provider.

mod common;

use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{chat_completion, seed_api_key, seed_game, seed_review, test_env};
use revctl::analysis::{
    AnalysisFilterPayload, AnalysisService, StartAnalysisRequest,
};
use revctl::db::models::analysis_jobs::JobStatus;
use revctl::db::models::reviews::FilterMode;
use revctl::types::JobId;

fn service(env: &common::TestEnv) -> Arc<AnalysisService> {
    Arc::new(AnalysisService::new(
        env.pool.clone(),
        env.vault.clone(),
        env.config.clone(),
    ))
}

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(12, 0, 0).unwrap()
}

async fn seed_reviews(env: &common::TestEnv, app_id: i64, count: usize) {
    seed_game(&env.pool, app_id, "Analyzed Game").await;
    for index in 0..count {
        seed_review(
            &env.pool,
            app_id,
            &format!("r{index}"),
            date(2024, 2, 1 + index as u32),
            "english",
        )
        .await;
    }
}

async fn wait_for_terminal(service: &AnalysisService, job_id: JobId) -> JobStatus {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        assert!(Instant::now() < deadline, "job did not reach a terminal state");
        let job = service.get_job(job_id).await.unwrap();
        match job.status.as_str() {
            "completed" => return JobStatus::Completed,
            "error" => return JobStatus::Error,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}

#[test_log::test(tokio::test)]
async fn batch_failure_falls_back_to_per_item_calls() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_reviews(&env, 1, 3).await;
    seed_api_key(&env, "openai", "sk-test-abcdef123456").await;

    // Batch file upload is rejected; every item must come through the
    // per-request endpoint instead.
    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("OK")))
        .expect(3)
        .mount(&server)
        .await;

    let analysis = service(&env);
    let job_id = analysis
        .clone()
        .start(StartAnalysisRequest {
            filter: AnalysisFilterPayload {
                app_id: Some(1),
                ..Default::default()
            },
            provider: Some("openai".to_string()),
            model: Some("gpt-5".to_string()),
            reviews_per_batch: Some(2),
            batches_per_request: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&analysis, job_id).await, JobStatus::Completed);

    let job = analysis.get_job(job_id).await.unwrap();
    assert_eq!(job.total_reviews, 3);
    assert_eq!(job.processed_count, 3);

    let results = analysis.list_job_results(job_id).await.unwrap();
    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.status, "complete");
        assert_eq!(result.analysed_review.as_deref(), Some("OK"));
        assert_eq!(result.input_tokens, Some(3));
        assert_eq!(result.output_tokens, Some(4));
        assert_eq!(result.total_tokens, Some(7));
        assert_eq!(result.game_name.as_deref(), Some("Analyzed Game"));
        assert!(result.completed_at.is_some());
    }
}

#[tokio::test]
async fn batch_path_uploads_polls_and_downloads() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_reviews(&env, 2, 2).await;
    seed_api_key(&env, "openai", "sk-test-abcdef123456").await;

    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/batches"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "batch-1", "status": "validating"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/batches/batch-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch-1",
            "status": "completed",
            "output_file_id": "file-2",
        })))
        .mount(&server)
        .await;

    // Output lines arrive out of order; the adapter aligns by custom_id.
    let output_lines = [
        json!({"custom_id": "1", "response": {"status_code": 200, "body": {
            "choices": [{"message": {"content": "second"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3},
        }}}),
        json!({"custom_id": "0", "response": {"status_code": 200, "body": {
            "choices": [{"message": {"content": "first"}}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 5, "total_tokens": 9},
        }}}),
    ]
    .map(|line| line.to_string())
    .join("\n");
    Mock::given(method("GET"))
        .and(path("/v1/files/file-2/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(output_lines))
        .expect(1)
        .mount(&server)
        .await;
    // The per-item endpoint must stay untouched on the happy path.
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let analysis = service(&env);
    let job_id = analysis
        .clone()
        .start(StartAnalysisRequest {
            filter: AnalysisFilterPayload {
                app_id: Some(2),
                ..Default::default()
            },
            provider: Some("openai".to_string()),
            reviews_per_batch: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&analysis, job_id).await, JobStatus::Completed);

    let results = analysis.list_job_results(job_id).await.unwrap();
    assert_eq!(results.len(), 2);
    // Units are in insertion order (newest review first); outputs aligned
    // by custom_id map the first unit to "first".
    assert_eq!(results[0].analysed_review.as_deref(), Some("first"));
    assert_eq!(results[0].total_tokens, Some(9));
    assert_eq!(results[1].analysed_review.as_deref(), Some("second"));
    assert_eq!(results[1].total_tokens, Some(3));
}

#[tokio::test]
async fn concurrent_batches_complete_and_respect_the_progress_cap() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_reviews(&env, 6, 6).await;
    seed_api_key(&env, "openai", "sk-test-abcdef123456").await;

    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("no batches today"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("OK")))
        .expect(6)
        .mount(&server)
        .await;

    let analysis = service(&env);
    let job_id = analysis
        .clone()
        .start(StartAnalysisRequest {
            filter: AnalysisFilterPayload {
                app_id: Some(6),
                ..Default::default()
            },
            provider: Some("openai".to_string()),
            reviews_per_batch: Some(2),
            batches_per_request: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&analysis, job_id).await, JobStatus::Completed);

    let job = analysis.get_job(job_id).await.unwrap();
    assert_eq!(job.total_reviews, 6);
    assert_eq!(job.processed_count, 6);

    let results = analysis.list_job_results(job_id).await.unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.status == "complete"));
}

#[tokio::test]
async fn missing_credential_fails_the_job() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_reviews(&env, 3, 1).await;

    let analysis = service(&env);
    let job_id = analysis
        .clone()
        .start(StartAnalysisRequest {
            filter: AnalysisFilterPayload {
                app_id: Some(3),
                ..Default::default()
            },
            provider: Some("openai".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&analysis, job_id).await, JobStatus::Error);
    let job = analysis.get_job(job_id).await.unwrap();
    assert!(job.error.unwrap().contains("No API key found for provider 'openai'"));
}

#[tokio::test]
async fn validation_rejects_zero_batch_sizes() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    let analysis = service(&env);

    let result = analysis
        .clone()
        .start(StartAnalysisRequest {
            reviews_per_batch: Some(0),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(revctl::Error::BadRequest { .. })));

    let result = analysis
        .clone()
        .start(StartAnalysisRequest {
            batches_per_request: Some(0),
            ..Default::default()
        })
        .await;
    assert!(matches!(result, Err(revctl::Error::BadRequest { .. })));

    assert!(analysis.list_jobs().await.unwrap().is_empty(), "no job row on validation failure");
}

#[tokio::test]
async fn preview_applies_shared_filter_grammar() {
    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 4, "Preview Game").await;
    for (id, day) in [("p1", 1), ("p2", 2), ("p3", 3)] {
        seed_review(&env.pool, 4, id, date(2024, 3, day), "english").await;
    }
    seed_review(&env.pool, 4, "p4", date(2024, 3, 4), "german").await;

    let analysis = service(&env);
    let (reviews, total) = analysis
        .preview(&AnalysisFilterPayload {
            app_id: Some(4),
            language: Some("english".to_string()),
            start_date: Some("2024-03-02".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(total, 2);
    // Newest first.
    let ids: Vec<_> = reviews.iter().map(|r| r.review_id.as_str()).collect();
    assert_eq!(ids, vec!["p3", "p2"]);

    // Tri-state policies narrow further.
    let (reviews, _) = analysis
        .preview(&AnalysisFilterPayload {
            app_id: Some(4),
            early_access: Some(FilterMode::Only),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(reviews.is_empty());
}

#[tokio::test]
async fn backfill_remaps_rows_with_raw_output_only() {
    use revctl::db::handlers::{AnalysisJobs, AnalysisResults};
    use revctl::db::models::analysis_jobs::AnalysisJobCreateDBRequest;
    use revctl::db::models::analysis_results::AnalysisResultCreateDBRequest;
    use revctl::analysis::MappedOutput;

    let server = MockServer::start().await;
    let env = test_env(&server.uri()).await;
    seed_game(&env.pool, 5, "Backfill Game").await;
    seed_review(&env.pool, 5, "b1", date(2024, 4, 1), "english").await;

    // A legacy row: raw output stored, canonical fields never mapped.
    let raw = r#"{"choices":[{"message":{"content":"OK"}}],"usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#;
    let result_id = {
        let mut conn = env.pool.acquire().await.unwrap();
        let job = AnalysisJobs::new(&mut conn)
            .create(&AnalysisJobCreateDBRequest { settings: None })
            .await
            .unwrap();
        let mut results = AnalysisResults::new(&mut conn);
        let row = results
            .create(&AnalysisResultCreateDBRequest {
                job_id: job.id,
                app_id: Some(5),
                game_name: None,
                review_id: Some("b1".to_string()),
                review_text_snapshot: Some("Review b1".to_string()),
                prompt_used: Some("p".to_string()),
                model: Some("gpt-5".to_string()),
                llm_provider: Some("openai".to_string()),
                reasoning_effort: None,
            })
            .await
            .unwrap();
        results
            .complete_with_output(row.id, raw, &MappedOutput::default(), None)
            .await
            .unwrap();
        row.id
    };

    let analysis = service(&env);
    let outcome = analysis.backfill(100).await.unwrap();
    assert_eq!(outcome.scanned, 1);
    assert_eq!(outcome.updated, 1);

    let row = analysis.get_result(result_id).await.unwrap();
    assert_eq!(row.analysed_review.as_deref(), Some("OK"));
    assert_eq!(row.input_tokens, Some(3));
    assert_eq!(row.output_tokens, Some(4));
    assert_eq!(row.total_tokens, Some(7));
    assert_eq!(row.game_name.as_deref(), Some("Backfill Game"));

    // A second pass finds nothing left to do.
    let outcome = analysis.backfill(100).await.unwrap();
    assert_eq!(outcome.scanned, 0);
}
