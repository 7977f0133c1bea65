//! Google Trends adapter: search-interest time series as sentiment-proxy
//! events (§4.1, §4.2).
//!
//! Grounded in `original_source/backend/data_pipeline/adapters/google_trends_adapter.py`
//! (fixed keyword watchlist, 0..100 interest score, keyword-table category
//! classification); ported from the `pytrends` scrape to the public
//! `trends.google.com/trends/api/widgetdata/multiline` JSON endpoint, which
//! returns the same interest-over-time series without a paid key.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Category, Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://trends.google.com/trends/api/widgetdata/multiline";

/// Fixed watchlist of search terms tracked for this country's coverage.
const WATCHED_KEYWORDS: &[&str] = &[
    "venezuela crisis",
    "venezuela sanctions",
    "venezuela oil exports",
    "venezuela inflation",
    "venezuela protests",
];

pub struct GoogleTrendsAdapter {
    client: Client,
    base_url: String,
}

impl GoogleTrendsAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("eventintel-backend/1.0")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }
}

impl Default for GoogleTrendsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for GoogleTrendsAdapter {
    fn source_name(&self) -> &'static str {
        "google_trends"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 */4 * * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        240
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let mut records = Vec::new();

        for keyword in WATCHED_KEYWORDS {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("keyword", (*keyword).to_string()),
                    ("start", window.start.to_rfc3339()),
                    ("end", window.end.to_rfc3339()),
                ])
                .send()
                .await
                .map_err(|e| PipelineError::transient(format!("google_trends request failed for {keyword}: {e}")))?;

            match response.status() {
                s if s.is_success() => {}
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    return Err(PipelineError::transient(format!(
                        "google_trends rate limited: {}",
                        response.status()
                    )))
                }
                s => return Err(PipelineError::permanent(format!("google_trends error status: {s}"))),
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PipelineError::permanent(format!("google_trends response not JSON: {e}")))?;

            for point in body.get("timeline").and_then(|v| v.as_array()).cloned().unwrap_or_default() {
                let mut point = point;
                if let Some(map) = point.as_object_mut() {
                    map.insert("keyword".to_string(), serde_json::Value::String((*keyword).to_string()));
                }
                records.push(point);
            }
        }

        Ok(records)
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for record in raw {
            let Some(keyword) = record.get("keyword").and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let Some(interest) = record.get("value").and_then(|v| v.as_f64()) else {
                tracing::debug!(source = "google_trends", keyword, "missing interest value, skipping");
                continue;
            };
            let Some(epoch) = record.get("time").and_then(|v| v.as_i64()) else {
                continue;
            };
            let event_timestamp = Utc.timestamp_opt(epoch, 0).single().unwrap_or(now);

            let (cat, subcategory) = category::classify(Source::GoogleTrends, Some(&keyword));
            let event_id = format!("{}:{}", keyword.replace(' ', "_"), epoch);

            // Rising search interest in a crisis-adjacent term reads as a
            // worsening signal; interest_score has no inherent sign, so
            // direction is driven off the category rather than magnitude.
            let direction = if matches!(cat, Category::Conflict | Category::Regulatory) || keyword.contains("crisis") {
                Direction::Negative
            } else {
                Direction::Neutral
            };

            let event = Event {
                id: Event::stable_id(Source::GoogleTrends, &event_id),
                source: Source::GoogleTrends,
                source_event_id: event_id,
                source_url: None,
                event_timestamp,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: Some(keyword.clone()),
                country_code: Some("VE".to_string()),
                admin1: None,
                admin2: None,
                latitude: None,
                longitude: None,
                magnitude_raw: Some(interest),
                magnitude_unit: Some(MagnitudeUnit::InterestScore),
                magnitude_norm: Some(normalize::interest_score(interest)),
                direction,
                tone_raw: None,
                tone_norm: None,
                num_sources: 1,
                source_credibility: 0.5,
                confidence: normalize::confidence(1, 0.5),
                actor1: None,
                actor2: None,
                commodities: vec![],
                sectors: vec![],
                themes: vec![keyword.clone()],
                title: format!("Search interest in \"{keyword}\": {interest:.0}/100"),
                content: format!("Google Trends interest score {interest:.0} for \"{keyword}\" at {event_timestamp}"),
                sentiment: None,
                risk_score: None,
                priority: None,
                severity: None,
                urgency: None,
                language: None,
                summary: None,
                relationships: vec![],
                llm_analysis: None,
                scoring_method: None,
                metadata: serde_json::from_value(record).unwrap_or_default(),
            };
            events.push(event);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transform_maps_interest_score_and_category() {
        let adapter = GoogleTrendsAdapter::new();
        let raw = vec![json!({
            "keyword": "venezuela oil exports",
            "value": 85.0,
            "time": 1_700_000_000i64,
        })];
        let events = adapter.transform(raw);
        assert_eq!(events.len(), 1);
        assert!((events[0].magnitude_norm.unwrap() - 0.85).abs() < 1e-9);
        assert_eq!(events[0].category, Category::Energy);
    }

    #[test]
    fn transform_skips_records_without_value() {
        let adapter = GoogleTrendsAdapter::new();
        let raw = vec![json!({"keyword": "venezuela crisis", "time": 1_700_000_000i64})];
        assert!(adapter.transform(raw).is_empty());
    }
}
