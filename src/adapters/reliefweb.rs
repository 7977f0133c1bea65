//! ReliefWeb adapter: humanitarian situation reports (§4.1, §4.2).
//!
//! No original_source reference exists for this source tag (the distilled
//! Python original only ships a GDELT/World Bank/SEC EDGAR/Google Trends
//! set); the field mapping below follows ReliefWeb's public `reports` API
//! (`https://api.reliefweb.int/v1/reports`) directly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{clip, Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://api.reliefweb.int/v1/reports";

pub struct ReliefwebAdapter {
    client: Client,
    base_url: String,
    app_name: String,
}

impl ReliefwebAdapter {
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
            app_name: "eventintel".to_string(),
        }
    }
}

impl Default for ReliefwebAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for ReliefwebAdapter {
    fn source_name(&self) -> &'static str {
        "reliefweb"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 */6 * * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        360
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let body = serde_json::json!({
            "appname": self.app_name,
            "limit": window.limit,
            "filter": {
                "field": "date.created",
                "value": {
                    "from": window.start.to_rfc3339(),
                    "to": window.end.to_rfc3339(),
                }
            },
            "fields": {
                "include": ["title", "body", "date.created", "source.name", "country.iso3",
                             "country.name", "type.name", "theme.name", "disaster_type.name"]
            },
            "sort": ["date.created:desc"],
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("reliefweb request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                return Err(PipelineError::transient(format!("reliefweb rate limited: {}", response.status())))
            }
            s => return Err(PipelineError::permanent(format!("reliefweb error status: {s}"))),
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(format!("reliefweb response not JSON: {e}")))?;

        Ok(parsed
            .get("data")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for record in raw {
            let Some(report_id) = record.get("id").and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string()))) else {
                tracing::warn!(source = "reliefweb", "record missing id, skipping");
                continue;
            };
            let fields = record.get("fields").cloned().unwrap_or_default();

            let title = fields.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled report").to_string();
            let body = fields.get("body").and_then(|v| v.as_str()).unwrap_or("").to_string();

            let report_type = fields
                .get("type")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|t| t.get("name"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let (cat, subcategory) = category::classify(Source::Reliefweb, report_type.as_deref());

            let country_iso3 = fields
                .get("country")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|c| c.get("iso3"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_uppercase());

            let created = fields
                .get("date")
                .and_then(|d| d.get("created"))
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);

            let num_sources = fields
                .get("source")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u32)
                .unwrap_or(1)
                .max(1);
            let source_credibility = 0.75;

            // No direct magnitude signal in ReliefWeb reports; a severity
            // disaster/crisis report is treated as moderately negative so C3
            // still has something to classify against.
            let is_disaster = fields.get("disaster_type").and_then(|v| v.as_array()).map(|a| !a.is_empty()).unwrap_or(false);
            let magnitude_norm = if is_disaster { 0.6 } else { 0.3 };

            let event = Event {
                id: Event::stable_id(Source::Reliefweb, &report_id),
                source: Source::Reliefweb,
                source_event_id: report_id,
                source_url: None,
                event_timestamp: created,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: report_type,
                country_code: country_iso3,
                admin1: None,
                admin2: None,
                latitude: None,
                longitude: None,
                magnitude_raw: None,
                magnitude_unit: Some(MagnitudeUnit::Percent),
                magnitude_norm: Some(clip(magnitude_norm, 0.0, 1.0)),
                direction: Direction::Negative,
                tone_raw: None,
                tone_norm: None,
                num_sources,
                source_credibility,
                confidence: normalize::confidence(num_sources, source_credibility),
                actor1: None,
                actor2: None,
                commodities: vec![],
                sectors: vec![],
                themes: fields
                    .get("theme")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|t| t.get("name").and_then(|v| v.as_str()).map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
                title,
                content: body,
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
                metadata: serde_json::from_value(fields).unwrap_or_default(),
            };
            events.push(event);
        }

        events
    }
}
