//! Scrape run configuration: request payloads, per-title override merge,
//! validation, and the traversal-parameter hash that namespaces saved
//! cursors.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::db::models::reviews::{FilterMode, ReviewFilter};
use crate::errors::{Error, Result};
use crate::types::AppId;

/// Start payload: global settings plus per-title overrides keyed by the
/// title's app id (string-keyed, as serialized by callers).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StartScrapeRequest {
    #[serde(default)]
    pub global_settings: ScrapeSettingsPayload,
    #[serde(default)]
    pub per_game_overrides: HashMap<String, ScrapeSettingsPayload>,
}

/// Raw, partially-specified settings as supplied by the caller. Missing
/// fields fall back to the global payload and then to defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScrapeSettingsPayload {
    pub max_reviews: Option<i64>,
    pub complete_scraping: Option<bool>,
    pub rate_limit_rpm: Option<u32>,
    pub language: Option<String>,
    /// Inclusive day window, `YYYY-MM-DD`
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub early_access: Option<FilterMode>,
    pub received_for_free: Option<FilterMode>,
    pub min_playtime: Option<f64>,
    pub max_playtime: Option<f64>,
}

impl ScrapeSettingsPayload {
    /// Overlay `self` on top of `base`: fields present here win.
    pub fn merged_over(&self, base: &ScrapeSettingsPayload) -> ScrapeSettingsPayload {
        ScrapeSettingsPayload {
            max_reviews: self.max_reviews.or(base.max_reviews),
            complete_scraping: self.complete_scraping.or(base.complete_scraping),
            rate_limit_rpm: self.rate_limit_rpm.or(base.rate_limit_rpm),
            language: self.language.clone().or_else(|| base.language.clone()),
            start_date: self.start_date.clone().or_else(|| base.start_date.clone()),
            end_date: self.end_date.clone().or_else(|| base.end_date.clone()),
            early_access: self.early_access.or(base.early_access),
            received_for_free: self.received_for_free.or(base.received_for_free),
            min_playtime: self.min_playtime.or(base.min_playtime),
            max_playtime: self.max_playtime.or(base.max_playtime),
        }
    }
}

/// Fully-resolved per-title scrape settings.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub max_reviews: i64,
    /// Unbounded cap: ignore `max_reviews` and walk the title to the end
    pub complete_scraping: bool,
    pub rate_limit_rpm: u32,
    pub language: String,
    pub start_date: Option<NaiveDateTime>,
    /// Expanded to inclusive end-of-day
    pub end_date: Option<NaiveDateTime>,
    pub early_access: FilterMode,
    pub received_for_free: FilterMode,
    pub min_playtime: Option<f64>,
    pub max_playtime: Option<f64>,
}

/// Parse a `YYYY-MM-DD` day bound; end bounds expand to inclusive
/// end-of-day.
pub(crate) fn parse_date(s: &str, end_of_day: bool) -> Result<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Error::bad_request(format!("invalid date '{s}', expected YYYY-MM-DD")))?;
    let base = date.and_time(NaiveTime::MIN);
    if end_of_day {
        Ok(base + Duration::days(1) - Duration::microseconds(1))
    } else {
        Ok(base)
    }
}

impl ScrapeSettings {
    /// Resolve a payload into concrete settings, validating ranges.
    pub fn resolve(payload: &ScrapeSettingsPayload) -> Result<Self> {
        let settings = Self {
            max_reviews: payload.max_reviews.unwrap_or(1000),
            complete_scraping: payload.complete_scraping.unwrap_or(false),
            rate_limit_rpm: payload.rate_limit_rpm.unwrap_or(60).max(1),
            language: payload.language.clone().unwrap_or_else(|| "english".to_string()).to_lowercase(),
            start_date: payload.start_date.as_deref().map(|s| parse_date(s, false)).transpose()?,
            end_date: payload.end_date.as_deref().map(|s| parse_date(s, true)).transpose()?,
            early_access: payload.early_access.unwrap_or_default(),
            received_for_free: payload.received_for_free.unwrap_or_default(),
            min_playtime: payload.min_playtime,
            max_playtime: payload.max_playtime,
        };

        if let (Some(min), Some(max)) = (settings.min_playtime, settings.max_playtime) {
            if max <= min {
                return Err(Error::bad_request(
                    "max_playtime must be greater than min_playtime",
                ));
            }
        }
        Ok(settings)
    }

    /// Stable hash over the parameters that affect traversal order.
    /// Playtime bounds are deliberately excluded: they filter rows but do
    /// not change which pages the cursor walks.
    pub fn params_hash(&self) -> String {
        let key = json!({
            "language": self.language,
            "start_date": self.start_date.map(|d| d.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
            "end_date": self.end_date.map(|d| d.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()),
            "early_access": self.early_access.as_str(),
            "received_for_free": self.received_for_free.as_str(),
        });
        let digest = Sha256::digest(key.to_string().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// The stored-review filter equivalent to these settings for one title.
    pub fn review_filter(&self, app_id: AppId) -> ReviewFilter {
        ReviewFilter {
            app_id: Some(app_id),
            start_date: self.start_date,
            end_date: self.end_date,
            min_playtime: self.min_playtime,
            max_playtime: self.max_playtime,
            early_access: self.early_access,
            received_for_free: self.received_for_free,
            language: Some(self.language.clone()),
            ..ReviewFilter::default()
        }
    }

    /// Seconds to sleep between requests to honor the per-title rate limit.
    pub fn rate_limit_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(60.0 / f64::from(self.rate_limit_rpm.max(1)))
    }
}
