//! Upstream store API clients: review pages, realtime search, applist.
//!
//! All requests go through one `reqwest::Client` with the configured
//! timeout. Base URLs come from configuration so tests can point the
//! client at a local mock server.

use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::config::SteamConfig;
use crate::errors::Result;
use crate::types::AppId;

/// One page of reviews as returned by the `appreviews` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewsPage {
    #[serde(default)]
    pub reviews: Vec<SteamReview>,
    #[serde(default)]
    pub query_summary: QuerySummary,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuerySummary {
    #[serde(default)]
    pub total_reviews: Option<i64>,
    #[serde(default)]
    pub num_reviews: Option<i64>,
}

impl QuerySummary {
    /// Best-effort total across the two summary variants.
    pub fn total(&self) -> i64 {
        self.total_reviews.or(self.num_reviews).unwrap_or(0)
    }
}

/// A raw upstream review. Fields are tolerated missing; offending items
/// are skipped downstream rather than failing the page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SteamReview {
    #[serde(default)]
    pub recommendationid: Option<Value>,
    #[serde(default)]
    pub timestamp_created: Option<i64>,
    #[serde(default)]
    pub voted_up: bool,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub written_during_early_access: bool,
    #[serde(default)]
    pub received_for_free: bool,
    #[serde(default)]
    pub timestamp_updated: Option<i64>,
    #[serde(default)]
    pub votes_helpful: Option<i64>,
    /// The store serves this as either a number or a numeric string
    #[serde(default)]
    pub weighted_vote_score: Option<Value>,
    #[serde(default)]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub steam_purchase: Option<bool>,
    #[serde(default)]
    pub author: Option<SteamAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SteamAuthor {
    #[serde(default)]
    pub playtime_forever: Option<f64>,
    #[serde(default)]
    pub num_games_owned: Option<i64>,
    #[serde(default)]
    pub num_reviews: Option<i64>,
    #[serde(default)]
    pub playtime_last_two_weeks: Option<f64>,
    #[serde(default)]
    pub last_played: Option<i64>,
}

impl SteamReview {
    /// Review id as a string, whether the store sent a string or number.
    pub fn review_id(&self) -> Option<String> {
        match &self.recommendationid {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn weighted_score(&self) -> Option<f64> {
        match &self.weighted_vote_score {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A `{app_id, name}` pair from search or the applist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppEntry {
    pub app_id: AppId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SteamClient {
    http: reqwest::Client,
    store_base_url: String,
    api_base_url: String,
}

impl SteamClient {
    pub fn new(config: &SteamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            store_base_url: config.store_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch one page of reviews for a title. The initial cursor is `*`.
    #[instrument(skip(self), err)]
    pub async fn fetch_review_page(
        &self,
        app_id: AppId,
        language: &str,
        cursor: &str,
    ) -> Result<ReviewsPage> {
        let url = format!("{}/appreviews/{}", self.store_base_url, app_id);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("json", "1"),
                ("filter", "recent"),
                ("language", language),
                ("num_per_page", "100"),
                ("cursor", cursor),
            ])
            .send()
            .await?
            .error_for_status()?;
        let page = response.json::<ReviewsPage>().await?;
        Ok(page)
    }

    /// Search the store in real time. Numeric queries are treated as an
    /// app-id lookup; text queries page through the storesearch endpoint
    /// until `count` entries are gathered or results run out.
    #[instrument(skip(self), err)]
    pub async fn search(&self, query: &str, start: i64, count: i64) -> Result<Vec<AppEntry>> {
        let q = query.trim();
        if let Ok(app_id) = q.parse::<AppId>() {
            return self.app_details(app_id).await;
        }

        let mut results = Vec::new();
        let mut remaining = count;
        let mut current_start = start;
        while remaining > 0 {
            // The upstream caps per-request results, so page in chunks.
            let chunk_size = remaining.min(50);
            let url = format!("{}/api/storesearch/", self.store_base_url);
            let data: Value = self
                .http
                .get(&url)
                .query(&[
                    ("term", q.to_string()),
                    ("l", "english".to_string()),
                    ("cc", "US".to_string()),
                    ("start", current_start.to_string()),
                    ("count", chunk_size.to_string()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let items = data
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }

            let fetched = items.len() as i64;
            for item in items {
                let app_id = item
                    .get("id")
                    .or_else(|| item.get("appid"))
                    .and_then(Value::as_i64);
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("");
                if let Some(app_id) = app_id {
                    if !name.is_empty() {
                        results.push(AppEntry {
                            app_id,
                            name: name.to_string(),
                        });
                    }
                }
            }

            remaining -= fetched;
            current_start += fetched;
            if fetched < chunk_size {
                break;
            }
        }
        results.truncate(count as usize);
        Ok(results)
    }

    async fn app_details(&self, app_id: AppId) -> Result<Vec<AppEntry>> {
        let url = format!("{}/api/appdetails", self.store_base_url);
        let data: Value = self
            .http
            .get(&url)
            .query(&[("appids", app_id.to_string()), ("l", "english".to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entry = data.get(app_id.to_string()).cloned().unwrap_or(Value::Null);
        let success = entry.get("success").and_then(Value::as_bool).unwrap_or(false);
        let name = entry
            .get("data")
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");
        if success && !name.is_empty() {
            Ok(vec![AppEntry {
                app_id,
                name: name.to_string(),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    /// Fetch the full applist. Entries with blank names are dropped.
    #[instrument(skip(self), err)]
    pub async fn fetch_app_list(&self) -> Result<Vec<AppEntry>> {
        let url = format!("{}/ISteamApps/GetAppList/v2/", self.api_base_url);
        let data: Value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let apps = data
            .get("applist")
            .and_then(|a| a.get("apps"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for entry in apps {
            let app_id = entry
                .get("appid")
                .or_else(|| entry.get("appID"))
                .or_else(|| entry.get("app_id"))
                .and_then(Value::as_i64);
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if let Some(app_id) = app_id {
                if !name.is_empty() {
                    results.push(AppEntry {
                        app_id,
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }
}
