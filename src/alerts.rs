//! Threshold-alert generator (C16): fires only on a threshold *crossing*,
//! emitting a synthetic canonical event through the same bus as any other
//! source (§4.15).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::PipelineResult;
use crate::event::{Category, Direction, Event, Priority, Severity, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdSide {
    Low,
    High,
}

/// Per-indicator threshold configuration (§4.15). Either bound may be unset.
#[derive(Debug, Clone)]
pub struct IndicatorThresholds {
    pub indicator: String,
    pub category: Category,
    pub threshold_low: Option<f64>,
    pub threshold_high: Option<f64>,
}

/// Fixed per-indicator severity rule table (§4.15): crossing the high
/// threshold is always treated as more severe than crossing the low one,
/// since in this system's domain (macro/trade indicators) upside breaches
/// (inflation spikes, export collapse) carry the acute risk.
fn severity_for_crossing(side: ThresholdSide) -> Severity {
    match side {
        ThresholdSide::High => Severity::Sev4,
        ThresholdSide::Low => Severity::Sev3,
    }
}

fn side_of(value: f64, thresholds: &IndicatorThresholds) -> Option<ThresholdSide> {
    if let Some(high) = thresholds.threshold_high {
        if value >= high {
            return Some(ThresholdSide::High);
        }
    }
    if let Some(low) = thresholds.threshold_low {
        if value <= low {
            return Some(ThresholdSide::Low);
        }
    }
    None
}

/// Detects a crossing: `previous` was on a different side (or on neither
/// side) than `current` is now. Staying beyond a threshold across
/// consecutive readings does not re-fire (§4.15).
pub fn detect_crossing(previous: f64, current: f64, thresholds: &IndicatorThresholds) -> Option<ThresholdSide> {
    let previous_side = side_of(previous, thresholds);
    let current_side = side_of(current, thresholds)?;
    if previous_side == Some(current_side) {
        None
    } else {
        Some(current_side)
    }
}

/// Builds the synthetic canonical event for a fired alert (§4.15): a
/// `threshold_alert` event type the downstream scoring pipeline treats like
/// any other ingested event.
pub fn build_alert_event(
    thresholds: &IndicatorThresholds,
    side: ThresholdSide,
    value: f64,
    observed_at: DateTime<Utc>,
) -> Event {
    let now = Utc::now();
    let severity = severity_for_crossing(side);
    let side_label = match side {
        ThresholdSide::Low => "below",
        ThresholdSide::High => "above",
    };
    let bound = match side {
        ThresholdSide::Low => thresholds.threshold_low,
        ThresholdSide::High => thresholds.threshold_high,
    }
    .unwrap_or(value);

    Event {
        id: format!("alert:{}", Uuid::new_v4()),
        source: Source::Fred,
        source_event_id: format!("{}:{}", thresholds.indicator, observed_at.to_rfc3339()),
        source_url: None,
        event_timestamp: observed_at,
        ingested_at: now,
        created_at: now,
        category: thresholds.category,
        subcategory: None,
        event_type: Some("THRESHOLD_ALERT".to_string()),
        country_code: None,
        admin1: None,
        admin2: None,
        latitude: None,
        longitude: None,
        magnitude_raw: Some(value),
        magnitude_unit: None,
        magnitude_norm: Some(1.0),
        direction: Direction::Negative,
        tone_raw: None,
        tone_norm: None,
        num_sources: 1,
        source_credibility: 1.0,
        confidence: 1.0,
        actor1: None,
        actor2: None,
        commodities: vec![],
        sectors: vec![],
        themes: vec!["THRESHOLD_ALERT".to_string()],
        title: format!("{} moved {} threshold ({:.2} vs {:.2})", thresholds.indicator, side_label, value, bound),
        content: format!(
            "Indicator '{}' crossed {side_label} its configured threshold of {bound:.2}, now at {value:.2}.",
            thresholds.indicator
        ),
        sentiment: None,
        risk_score: Some(match severity {
            Severity::Sev4 => 75.0,
            Severity::Sev3 => 55.0,
            _ => 50.0,
        }),
        priority: Some(match side {
            ThresholdSide::High => Priority::P2,
            ThresholdSide::Low => Priority::P3,
        }),
        severity: Some(severity),
        urgency: None,
        language: None,
        summary: None,
        relationships: vec![],
        llm_analysis: None,
        scoring_method: Some("threshold_alert".to_string()),
        metadata: Default::default(),
    }
}

/// Checks one reading against its thresholds and, on a crossing, publishes
/// the synthetic alert event onto the bus's ingest topic (§4.15) — it flows
/// through the ordinary ingest → analyze → extract pipeline from there.
pub async fn check_and_publish(
    bus: &EventBus,
    thresholds: &IndicatorThresholds,
    previous: f64,
    current: f64,
    observed_at: DateTime<Utc>,
) -> PipelineResult<Option<Event>> {
    let Some(side) = detect_crossing(previous, current, thresholds) else {
        return Ok(None);
    };
    let event = build_alert_event(thresholds, side, current, observed_at);
    bus.publish_ingest(event.clone()).await?;
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> IndicatorThresholds {
        IndicatorThresholds {
            indicator: "CPI_YOY".to_string(),
            category: Category::Economic,
            threshold_low: Some(0.0),
            threshold_high: Some(8.0),
        }
    }

    #[test]
    fn crossing_above_high_threshold_fires() {
        let side = detect_crossing(7.5, 8.5, &thresholds());
        assert_eq!(side, Some(ThresholdSide::High));
    }

    #[test]
    fn staying_above_threshold_does_not_refire() {
        assert_eq!(detect_crossing(9.0, 9.5, &thresholds()), None);
    }

    #[test]
    fn crossing_back_under_does_not_fire_an_alert() {
        // still a "crossing" in the sense of changing sides, but there is no
        // configured low threshold that 9.5 -> 7.0 satisfies (7.0 > low=0.0
        // and < high=8.0, i.e. now within-band), so no alert should fire.
        assert_eq!(detect_crossing(9.5, 7.0, &thresholds()), None);
    }

    #[test]
    fn crossing_below_low_threshold_fires() {
        let side = detect_crossing(0.5, -1.0, &thresholds());
        assert_eq!(side, Some(ThresholdSide::Low));
    }

    #[test]
    fn built_event_is_a_valid_canonical_event() {
        let event = build_alert_event(&thresholds(), ThresholdSide::High, 9.2, Utc::now());
        assert!(event.check_invariants().is_ok());
        assert_eq!(event.event_type.as_deref(), Some("THRESHOLD_ALERT"));
    }
}
