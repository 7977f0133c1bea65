//! FRED adapter: macroeconomic time series as indicator events (§4.1, §4.2).
//!
//! No original_source reference exists for this tag; field mapping follows
//! the public FRED `series/observations` REST API directly, tracking a
//! fixed watchlist of series relevant to the covered economy.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

/// `(series_id, bad_when_up)` — whether a rising value is a worsening signal.
const WATCHED_SERIES: &[(&str, bool)] = &[
    ("DCOILWTICO", false),
    ("DTWEXBGS", true),
    ("T10Y2Y", true),
    ("VIXCLS", true),
];

pub struct FredAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FredAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("eventintel-backend/1.0")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            api_key: std::env::var("FRED_API_KEY").ok(),
        }
    }
}

impl Default for FredAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for FredAdapter {
    fn source_name(&self) -> &'static str {
        "fred"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 6 * * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        1440
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let Some(api_key) = &self.api_key else {
            return Err(PipelineError::permanent("FRED_API_KEY is not configured"));
        };

        let mut records = Vec::new();
        for (series_id, bad_when_up) in WATCHED_SERIES {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("series_id", series_id.to_string()),
                    ("api_key", api_key.clone()),
                    ("file_type", "json".to_string()),
                    ("observation_start", window.start.format("%Y-%m-%d").to_string()),
                    ("observation_end", window.end.format("%Y-%m-%d").to_string()),
                    ("limit", window.limit.to_string()),
                ])
                .send()
                .await
                .map_err(|e| PipelineError::transient(format!("fred request failed for {series_id}: {e}")))?;

            match response.status() {
                s if s.is_success() => {}
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    return Err(PipelineError::transient(format!("fred rate limited: {}", response.status())))
                }
                s => return Err(PipelineError::permanent(format!("fred error status for {series_id}: {s}"))),
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PipelineError::permanent(format!("fred response not JSON: {e}")))?;

            for obs in body.get("observations").and_then(|v| v.as_array()).cloned().unwrap_or_default() {
                let mut obs = obs;
                if let Some(map) = obs.as_object_mut() {
                    map.insert("series_id".to_string(), serde_json::Value::String((*series_id).to_string()));
                    map.insert("bad_when_up".to_string(), serde_json::Value::Bool(*bad_when_up));
                }
                records.push(obs);
            }
        }

        Ok(records)
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for record in raw {
            let Some(series_id) = record.get("series_id").and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let Some(value) = record.get("value").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()) else {
                tracing::debug!(source = "fred", series_id, "missing/non-numeric value, skipping");
                continue;
            };
            let Some(date) = record.get("date").and_then(|v| v.as_str()).and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()) else {
                continue;
            };
            let bad_when_up = record.get("bad_when_up").and_then(|v| v.as_bool()).unwrap_or(true);

            let (cat, subcategory) = category::classify(Source::Fred, Some(&series_id));
            let event_timestamp = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
            let event_id = format!("{series_id}:{date}");

            let event = Event {
                id: Event::stable_id(Source::Fred, &event_id),
                source: Source::Fred,
                source_event_id: event_id,
                source_url: None,
                event_timestamp,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: Some(series_id.clone()),
                country_code: None,
                admin1: None,
                admin2: None,
                latitude: None,
                longitude: None,
                magnitude_raw: Some(value),
                magnitude_unit: Some(MagnitudeUnit::PercentChange),
                magnitude_norm: Some(normalize::percent_change(value)),
                direction: normalize::direction_from_change(value, bad_when_up, 0.01),
                tone_raw: None,
                tone_norm: None,
                num_sources: 1,
                source_credibility: 0.9,
                confidence: normalize::confidence(1, 0.9),
                actor1: None,
                actor2: None,
                commodities: vec![],
                sectors: vec![],
                themes: vec![],
                title: format!("{series_id} reading for {date}: {value}"),
                content: format!("FRED series {series_id} observation on {date}: {value}"),
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
