//! World Bank adapter: development indicators as economic events (§4.1, §4.2).
//!
//! Grounded in `original_source/backend/data_pipeline/adapters/world_bank_adapter.py`
//! (indicator/country/year/value shape, "bad when up" indicator-code list,
//! `wb-{country}-{indicator}-{year}` id), ported from its BigQuery query to
//! the public `api.worldbank.org/v2` REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://api.worldbank.org/v2/country/VEN/indicator";
const COUNTRY_CODE: &str = "VEN";

const WATCHED_INDICATORS: &[&str] = &[
    "NY.GDP.MKTP.KD.ZG",
    "FP.CPI.TOTL.ZG",
    "SL.UEM.TOTL.ZS",
    "NE.EXP.GNFS.KD.ZG",
    "SP.POP.GROW",
];

fn negative_is_bad(indicator_code: &str) -> bool {
    indicator_code.starts_with("FP.CPI")
        || indicator_code.starts_with("SL.UEM")
        || indicator_code.contains("DEBT")
        || indicator_code.contains("DEFICIT")
}

pub struct WorldBankAdapter {
    client: Client,
    base_url: String,
}

impl WorldBankAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("eventintel-backend/1.0")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }
}

impl Default for WorldBankAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for WorldBankAdapter {
    fn source_name(&self) -> &'static str {
        "world_bank"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 3 1 1,4,7,10 *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        129_600
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let mut records = Vec::new();

        for indicator_code in WATCHED_INDICATORS {
            let url = format!("{}/{}", self.base_url, indicator_code);
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("format", "json".to_string()),
                    ("per_page", window.limit.to_string()),
                    ("date", format!("{}:{}", window.start.format("%Y"), window.end.format("%Y"))),
                ])
                .send()
                .await
                .map_err(|e| PipelineError::transient(format!("world_bank request failed for {indicator_code}: {e}")))?;

            match response.status() {
                s if s.is_success() => {}
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    return Err(PipelineError::transient(format!("world_bank rate limited: {}", response.status())))
                }
                s => return Err(PipelineError::permanent(format!("world_bank error status for {indicator_code}: {s}"))),
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| PipelineError::permanent(format!("world_bank response not JSON: {e}")))?;

            // The API returns a 2-element array: [metadata, observations].
            if let Some(observations) = body.get(1).and_then(|v| v.as_array()) {
                records.extend(observations.iter().cloned());
            }
        }

        Ok(records)
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();
        let mut prev_values: std::collections::HashMap<String, f64> = std::collections::HashMap::new();

        for record in raw {
            let Some(indicator_code) = record.get("indicator").and_then(|v| v.get("id")).and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let Some(year) = record.get("date").and_then(|v| v.as_str()).and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            let Some(value) = record.get("value").and_then(|v| v.as_f64()) else {
                tracing::debug!(source = "world_bank", indicator_code, year, "null observation, skipping");
                continue;
            };

            let indicator_name = record
                .get("indicator")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown indicator")
                .to_string();

            let key = format!("{COUNTRY_CODE}-{indicator_code}");
            let prev = prev_values.get(&key).copied();
            let pct_change = match prev {
                Some(p) if p.abs() > f64::EPSILON => (value - p) / p * 100.0,
                _ => 0.0,
            };
            prev_values.insert(key, value);

            let (cat, subcategory) = category::classify(Source::WorldBank, Some(&indicator_code));
            let direction = normalize::direction_from_change(pct_change, negative_is_bad(&indicator_code), 1.0);
            let event_timestamp = Utc.with_ymd_and_hms(year, 12, 31, 0, 0, 0).single().unwrap_or(now);
            let event_id = format!("wb-{COUNTRY_CODE}-{indicator_code}-{year}");

            let event = Event {
                id: Event::stable_id(Source::WorldBank, &event_id),
                source: Source::WorldBank,
                source_event_id: event_id,
                source_url: Some(format!("https://data.worldbank.org/indicator/{indicator_code}?locations=VE")),
                event_timestamp,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: Some(indicator_code.clone()),
                country_code: Some(COUNTRY_CODE.to_string()),
                admin1: None,
                admin2: None,
                latitude: None,
                longitude: None,
                magnitude_raw: Some(pct_change),
                magnitude_unit: Some(MagnitudeUnit::PercentChange),
                magnitude_norm: Some(normalize::percent_change(pct_change)),
                direction,
                tone_raw: None,
                tone_norm: None,
                num_sources: 1,
                source_credibility: 0.95,
                confidence: 0.95,
                actor1: None,
                actor2: None,
                commodities: vec![],
                sectors: vec![],
                themes: vec![],
                title: format!("{indicator_name} ({year}): {value}"),
                content: format!("World Bank indicator {indicator_code} for Venezuela, {year}: {value}"),
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
    use crate::event::{Category, Direction};
    use serde_json::json;

    #[test]
    fn inflation_rising_is_negative() {
        let adapter = WorldBankAdapter::new();
        let raw = vec![
            json!({
                "indicator": {"id": "FP.CPI.TOTL.ZG", "value": "Inflation"},
                "date": "2023",
                "value": 100.0,
            }),
            json!({
                "indicator": {"id": "FP.CPI.TOTL.ZG", "value": "Inflation"},
                "date": "2024",
                "value": 150.0,
            }),
        ];
        let events = adapter.transform(raw);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].direction, Direction::Negative);
        assert_eq!(events[1].category, Category::Economic);
    }

    #[test]
    fn null_observation_is_skipped() {
        let adapter = WorldBankAdapter::new();
        let raw = vec![json!({"indicator": {"id": "NY.GDP.MKTP.KD.ZG"}, "date": "2024", "value": null})];
        assert!(adapter.transform(raw).is_empty());
    }
}
