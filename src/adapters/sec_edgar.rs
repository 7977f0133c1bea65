//! SEC EDGAR adapter: corporate filings that mention the covered country as
//! regulatory events (§4.1, §4.2).
//!
//! Grounded in `original_source/backend/data_pipeline/adapters/sec_edgar_adapter.py`,
//! which shipped as a stub pending BigQuery schema discovery; the expected
//! mapping documented in its docstring (`sec-{filing_id}` id, `"{company} -
//! {filing_type}"` title, `event_type="regulatory"`, filing metadata) is
//! implemented here against SEC's public full-text search API
//! (`efts.sec.gov/LATEST/search-index`) instead of the BigQuery dataset,
//! which needs no further schema discovery and carries the same fields.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};

use crate::category;
use crate::error::PipelineError;
use crate::event::{Direction, Event, MagnitudeUnit, Source};

use super::{normalize, Adapter, FetchWindow, RawRecord};

const DEFAULT_BASE_URL: &str = "https://efts.sec.gov/LATEST/search-index";

/// Full-text search term identifying filings relevant to the covered country.
const SEARCH_QUERY: &str = "Venezuela";

pub struct SecEdgarAdapter {
    client: Client,
    base_url: String,
}

impl SecEdgarAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("eventintel-backend/1.0 (contact: ops@eventintel.example)")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }
}

impl Default for SecEdgarAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for SecEdgarAdapter {
    fn source_name(&self) -> &'static str {
        "sec_edgar"
    }

    fn schedule_frequency(&self) -> &'static str {
        "0 * * * *"
    }

    fn default_lookback_minutes(&self) -> u32 {
        60
    }

    async fn fetch(&self, window: FetchWindow) -> crate::error::PipelineResult<Vec<RawRecord>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", format!("\"{SEARCH_QUERY}\"")),
                ("dateRange", "custom".to_string()),
                ("startdt", window.start.format("%Y-%m-%d").to_string()),
                ("enddt", window.end.format("%Y-%m-%d").to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("sec_edgar request failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                return Err(PipelineError::transient(format!("sec_edgar rate limited: {}", response.status())))
            }
            s => return Err(PipelineError::permanent(format!("sec_edgar error status: {s}"))),
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(format!("sec_edgar response not JSON: {e}")))?;

        let hits = body
            .get("hits")
            .and_then(|v| v.get("hits"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(hits.into_iter().take(window.limit as usize).collect())
    }

    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event> {
        let mut events = Vec::with_capacity(raw.len());
        let now = Utc::now();

        for hit in raw {
            let Some(filing_id) = hit.get("_id").and_then(|v| v.as_str()).map(String::from) else {
                tracing::warn!(source = "sec_edgar", "hit missing _id, skipping");
                continue;
            };
            let source = hit.get("_source").cloned().unwrap_or_default();

            let company_name = source
                .get("display_names")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown filer")
                .to_string();
            let filing_type = source.get("file_type").and_then(|v| v.as_str()).unwrap_or("filing").to_string();
            let cik = source
                .get("ciks")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str())
                .map(String::from);

            let filed_at = source
                .get("file_date")
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()))
                .unwrap_or(now);

            let (category, subcategory) = category::classify(Source::SecEdgar, Some(&filing_type));

            let event_id = format!("sec-{filing_id}");
            let filing_url = format!("https://www.sec.gov/Archives/edgar/data/{}", cik.as_deref().unwrap_or(""));

            let event = Event {
                id: Event::stable_id(Source::SecEdgar, &event_id),
                source: Source::SecEdgar,
                source_event_id: event_id,
                source_url: Some(filing_url),
                event_timestamp: filed_at,
                ingested_at: now,
                created_at: now,
                category,
                subcategory,
                event_type: Some(filing_type.clone()),
                country_code: None,
                admin1: None,
                admin2: None,
                latitude: None,
                longitude: None,
                magnitude_raw: None,
                magnitude_unit: Some(MagnitudeUnit::Percent),
                magnitude_norm: Some(0.4),
                direction: Direction::Neutral,
                tone_raw: None,
                tone_norm: None,
                num_sources: 1,
                source_credibility: 0.85,
                confidence: normalize::confidence(1, 0.85),
                actor1: None,
                actor2: None,
                commodities: vec![],
                sectors: vec![],
                themes: vec![],
                title: format!("{company_name} - {filing_type}"),
                content: format!("{company_name} filed a {filing_type} on {} referencing {SEARCH_QUERY}", filed_at.format("%Y-%m-%d")),
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
                metadata: build_metadata(&filing_id, &company_name, &filing_type, cik.as_deref()),
            };
            events.push(event);
        }

        events
    }
}

fn build_metadata(
    filing_id: &str,
    company_name: &str,
    filing_type: &str,
    cik: Option<&str>,
) -> std::collections::HashMap<String, serde_json::Value> {
    let mut map = std::collections::HashMap::new();
    map.insert("filing_id".to_string(), serde_json::Value::String(filing_id.to_string()));
    map.insert("company_name".to_string(), serde_json::Value::String(company_name.to_string()));
    map.insert("filing_type".to_string(), serde_json::Value::String(filing_type.to_string()));
    if let Some(cik) = cik {
        map.insert("cik".to_string(), serde_json::Value::String(cik.to_string()));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Category;
    use serde_json::json;

    #[test]
    fn transform_maps_filing_to_regulatory_event() {
        let adapter = SecEdgarAdapter::new();
        let raw = vec![json!({
            "_id": "0000320193-24-000001",
            "_source": {
                "display_names": ["Example Oil Corp (CIK 0000123456)"],
                "file_type": "8-K",
                "file_date": "2024-05-01",
                "ciks": ["0000123456"],
            }
        })];
        let events = adapter.transform(raw);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.category, Category::Regulatory);
        assert_eq!(e.source_event_id, "sec-0000320193-24-000001");
        assert_eq!(e.metadata.get("cik").and_then(|v| v.as_str()), Some("0000123456"));
    }

    #[test]
    fn transform_skips_hits_without_id() {
        let adapter = SecEdgarAdapter::new();
        let raw = vec![json!({"_source": {"display_names": ["No Id Corp"]}})];
        assert!(adapter.transform(raw).is_empty());
    }
}
