//! UN Comtrade adapter: bilateral trade flows as commodity events (§4.1, §4.2).
//!
//! No original_source reference exists for this tag; field mapping follows
//! the public UN Comtrade `data/C/A/HS` REST API (reporter/partner/HS
//! 2-digit commodity code, trade value and quantity).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://comtradeapi.un.org/data/v1/get/C/A/HS";
const REPORTER_CODE: &str = "862"; // Venezuela

pub struct UnComtradeAdapter {
    client: Client,
    base_url: String,
    subscription_key: Option<String>,
}

impl UnComtradeAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("eventintel-backend/1.0")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            subscription_key: std::env::var("COMTRADE_SUBSCRIPTION_KEY").ok(),
        }
    }
}

impl Default for UnComtradeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for UnComtradeAdapter {
    fn source_name(&self) -> &'static str {
        "un_comtrade"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 4 1 * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        43200
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let mut request = self.client.get(&self.base_url).query(&[
            ("reporterCode", REPORTER_CODE.to_string()),
            ("period", window.start.format("%Y").to_string()),
            ("maxRecords", window.limit.to_string()),
        ]);
        if let Some(key) = &self.subscription_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("un_comtrade request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                return Err(PipelineError::transient(format!("un_comtrade rate limited: {}", response.status())))
            }
            s => return Err(PipelineError::permanent(format!("un_comtrade error status: {s}"))),
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(format!("un_comtrade response not JSON: {e}")))?;

        Ok(body.get("data").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for record in raw {
            let Some(hs_code) = record.get("cmdCode").and_then(|v| v.as_str()).map(|s| s.chars().take(2).collect::<String>()) else {
                continue;
            };
            let Some(trade_value) = record.get("primaryValue").and_then(|v| v.as_f64()) else {
                tracing::debug!(source = "un_comtrade", "missing primaryValue, skipping");
                continue;
            };
            let period = record.get("period").and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string()))).unwrap_or_else(|| window_year(now));
            let flow_code = record.get("flowCode").and_then(|v| v.as_str()).unwrap_or("X").to_string();
            let partner = record.get("partnerDesc").and_then(|v| v.as_str()).unwrap_or("World").to_string();

            let (cat, subcategory) = category::classify(Source::UnComtrade, Some(&hs_code));
            let event_timestamp = period
                .parse::<i32>()
                .ok()
                .and_then(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).single())
                .unwrap_or(now);

            let prior_value = record.get("priorPeriodValue").and_then(|v| v.as_f64());
            let pct_change = match prior_value {
                Some(prior) if prior.abs() > f64::EPSILON => (trade_value - prior) / prior * 100.0,
                _ => 0.0,
            };
            // A drop in exports is negative for a commodity-exporting economy;
            // a drop in imports is directionally neutral-to-positive.
            let bad_when_up = flow_code != "X";
            let direction = normalize::direction_from_change(pct_change, bad_when_up, 1.0);

            let event_id = format!("{hs_code}:{flow_code}:{period}:{partner}");

            let event = Event {
                id: Event::stable_id(Source::UnComtrade, &event_id),
                source: Source::UnComtrade,
                source_event_id: event_id,
                source_url: None,
                event_timestamp,
                ingested_at: now,
                created_at: now,
                category: cat,
                subcategory,
                event_type: Some(format!("HS{hs_code}")),
                country_code: Some("VEN".to_string()),
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
                source_credibility: 0.85,
                confidence: normalize::confidence(1, 0.85),
                actor1: None,
                actor2: None,
                commodities: vec![hs_code.clone()],
                sectors: vec![],
                themes: vec![],
                title: format!("Trade flow HS{hs_code} with {partner}: ${trade_value:.0}"),
                content: format!(
                    "UN Comtrade reporter 862 (VEN), HS{hs_code}, flow {flow_code}, partner {partner}, value ${trade_value:.0}"
                ),
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

fn window_year(now: chrono::DateTime<Utc>) -> String {
    use chrono::Datelike;
    now.year().to_string()
}
