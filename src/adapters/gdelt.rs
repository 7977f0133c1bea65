//! GDELT events adapter: CAMEO-coded geopolitical event stream (§4.1, §4.2).
//!
//! Queries the public GDELT GKG DOC 2.0 API rather than BigQuery (no crate
//! in this workspace's stack speaks the BigQuery wire protocol); the field
//! mapping below follows the same `GoldsteinScale`/`AvgTone`/`NumSources`
//! shape as `original_source/backend/data_pipeline/adapters/gdelt_adapter.py`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Actor, ActorType, Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";

pub struct GdeltAdapter {
    client: Client,
    base_url: String,
}

impl GdeltAdapter {
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

    fn classify_actor_type(actor_code: Option<&str>) -> Option<ActorType> {
        let code = actor_code?.to_uppercase();
        if code.contains("GOV") || code.contains("LEG") || code.contains("JUD") {
            Some(ActorType::Government)
        } else if code.contains("MIL") || code.contains("ARM") {
            Some(ActorType::Military)
        } else if code.contains("REB") || code.contains("OPP") || code.contains("INS") {
            Some(ActorType::Rebel)
        } else if code.contains("BUS") || code.contains("COP") {
            Some(ActorType::Corporate)
        } else {
            Some(ActorType::Civilian)
        }
    }
}

impl Default for GdeltAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for GdeltAdapter {
    fn source_name(&self) -> &'static str {
        "gdelt"
    }

    fn schedule_frequency(&self) -> &'static str {
        "*/15 * * * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        15
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("mode", "artlist".to_string()),
                ("format", "json".to_string()),
                ("startdatetime", window.start.format("%Y%m%d%H%M%S").to_string()),
                ("enddatetime", window.end.format("%Y%m%d%H%M%S").to_string()),
                ("maxrecords", window.limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("gdelt request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                return Err(PipelineError::transient(format!("gdelt rate limited: {}", response.status())))
            }
            s => return Err(PipelineError::permanent(format!("gdelt error status: {s}"))),
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(format!("gdelt response not JSON: {e}")))?;

        let records = body
            .get("articles")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(records)
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for record in raw {
            let Some(event_id) = record
                .get("GLOBALEVENTID")
                .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string())))
            else {
                tracing::warn!(source = "gdelt", "record missing GLOBALEVENTID, skipping");
                continue;
            };

            let event_code = record.get("EventCode").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let (cat, subcategory) = category::classify(Source::Gdelt, Some(&event_code));

            let goldstein = record.get("GoldsteinScale").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let avg_tone = record.get("AvgTone").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let num_sources = record.get("NumSources").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as u32;
            let source_credibility = 0.7;

            let direction = if goldstein < -2.0 {
                Direction::Negative
            } else if goldstein > 2.0 {
                Direction::Positive
            } else {
                Direction::Neutral
            };

            let actor1_name = record.get("Actor1Name").and_then(|v| v.as_str()).map(String::from);
            let actor2_name = record.get("Actor2Name").and_then(|v| v.as_str()).map(String::from);
            let actor1 = actor1_name.as_ref().and_then(|name| {
                Self::classify_actor_type(record.get("Actor1Code").and_then(|v| v.as_str()))
                    .map(|actor_type| Actor { name: name.clone(), actor_type })
            });
            let actor2 = actor2_name.as_ref().and_then(|name| {
                Self::classify_actor_type(record.get("Actor2Code").and_then(|v| v.as_str()))
                    .map(|actor_type| Actor { name: name.clone(), actor_type })
            });

            let title = format!(
                "{} - {} ({event_code})",
                actor1_name.as_deref().unwrap_or("Unknown"),
                actor2_name.as_deref().unwrap_or("Event"),
            );
            let content = format!("GDELT event {event_code}, tone {avg_tone:.1}");

            let event = Event {
                id: Event::stable_id(Source::Gdelt, &event_id),
                source: Source::Gdelt,
                source_event_id: event_id,
                source_url: record.get("SOURCEURL").and_then(|v| v.as_str()).map(String::from),
                event_timestamp: now,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: Some(event_code),
                country_code: Some("VE".to_string()),
                admin1: record.get("ActionGeo_ADM1Code").and_then(|v| v.as_str()).map(String::from),
                admin2: record.get("ActionGeo_ADM2Code").and_then(|v| v.as_str()).map(String::from),
                latitude: record.get("ActionGeo_Lat").and_then(|v| v.as_f64()),
                longitude: record.get("ActionGeo_Long").and_then(|v| v.as_f64()),
                magnitude_raw: Some(goldstein),
                magnitude_unit: Some(MagnitudeUnit::Goldstein),
                magnitude_norm: Some(normalize::goldstein(goldstein)),
                direction,
                tone_raw: Some(avg_tone),
                tone_norm: Some(normalize::tone_from_avg_tone(avg_tone)),
                num_sources,
                source_credibility,
                confidence: normalize::confidence(num_sources, source_credibility),
                actor1,
                actor2,
                commodities: vec![],
                sectors: vec![],
                themes: vec![],
                title,
                content,
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
    use crate::event::Category;
    use serde_json::json;

    #[test]
    fn transform_skips_records_without_global_event_id() {
        let adapter = GdeltAdapter::new();
        let raw = vec![json!({"EventCode": "190"})];
        assert!(adapter.transform(raw).is_empty());
    }

    #[test]
    fn transform_maps_goldstein_and_direction() {
        let adapter = GdeltAdapter::new();
        let raw = vec![json!({
            "GLOBALEVENTID": 123456,
            "EventCode": "193",
            "GoldsteinScale": -9.0,
            "AvgTone": -5.0,
            "NumSources": 4,
            "SOURCEURL": "https://example.com/a",
        })];
        let events = adapter.transform(raw);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.source, Source::Gdelt);
        assert_eq!(e.direction, Direction::Negative);
        assert_eq!(e.category, Category::Conflict);
        assert!((e.magnitude_norm.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(e.id, "gdelt:123456");
    }
}
