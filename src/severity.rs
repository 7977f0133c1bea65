//! P1-P4 severity classifier (C3).
//!
//! Rules run top-down, first hit wins (§4.4). Purely deterministic — no LLM
//! is consulted — so P1 is reliable for alerting even before C8/C9 run.

use lazy_static::lazy_static;
use regex::RegexSet;

use crate::event::{Category, Direction, Event, MagnitudeUnit, Priority};

const P1_EVENT_TYPES: &[&str] = &[
    "COUP",
    "COUP_ATTEMPT",
    "NATIONALIZATION",
    "EXPROPRIATION",
    "SOVEREIGN_DEFAULT",
    "MILITARY_INTERVENTION",
    "HEAD_OF_STATE_REMOVED",
    "OIL_EXPORT_HALT",
];

const P1_CAMEO_CODES: &[&str] = &["192", "193", "194", "195", "1031"];

const FATALITY_THRESHOLD: f64 = 10.0;

lazy_static! {
    static ref P1_KEYWORD_PATTERNS: RegexSet = RegexSet::new([
        r"(?i)coup\s+(attempt|d'état)?",
        r"(?i)nationali[sz](e|ation)",
        r"(?i)expropriate?",
        r"(?i)sovereign\s+default",
        r"(?i)sanctions?\s+(announced|imposed)",
        r"(?i)oil\s+export\s+(halt|stop|ban)",
    ])
    .expect("P1 keyword patterns are valid");
}

/// A classification result with the human-readable reason required by §4.4.
pub struct SeverityOutcome {
    pub priority: Priority,
    pub reason: String,
}

pub fn classify(event: &Event) -> SeverityOutcome {
    if let Some(outcome) = p1(event) {
        return outcome;
    }
    if let Some(outcome) = p2(event) {
        return outcome;
    }
    if let Some(outcome) = p3(event) {
        return outcome;
    }
    SeverityOutcome {
        priority: Priority::P4,
        reason: "Low impact / informational".to_string(),
    }
}

fn p1(event: &Event) -> Option<SeverityOutcome> {
    if let Some(event_type) = &event.event_type {
        let upper = event_type.to_uppercase();
        if P1_EVENT_TYPES.contains(&upper.as_str()) {
            return Some(SeverityOutcome {
                priority: Priority::P1,
                reason: format!("Auto-trigger: {event_type}"),
            });
        }
    }

    if let Some(subcategory) = &event.subcategory {
        if P1_CAMEO_CODES.contains(&subcategory.as_str()) {
            return Some(SeverityOutcome {
                priority: Priority::P1,
                reason: format!("Auto-trigger: CAMEO {subcategory}"),
            });
        }
    }

    let search_text = format!("{} {}", event.title, event.content);
    if P1_KEYWORD_PATTERNS.is_match(&search_text) {
        return Some(SeverityOutcome {
            priority: Priority::P1,
            reason: "Auto-trigger: keyword pattern match".to_string(),
        });
    }

    if event.magnitude_unit == Some(MagnitudeUnit::Fatalities) {
        if let Some(raw) = event.magnitude_raw {
            if raw >= FATALITY_THRESHOLD {
                return Some(SeverityOutcome {
                    priority: Priority::P1,
                    reason: format!("High fatalities: {}", raw as i64),
                });
            }
        }
    }

    if event.category == Category::Energy
        && event.commodities.iter().any(|c| c == "OIL")
        && event.direction == Direction::Negative
        && event.magnitude_norm.map(|m| m > 0.8).unwrap_or(false)
    {
        return Some(SeverityOutcome {
            priority: Priority::P1,
            reason: "Major oil/energy disruption".to_string(),
        });
    }

    None
}

fn p2(event: &Event) -> Option<SeverityOutcome> {
    if event.magnitude_unit == Some(MagnitudeUnit::Fatalities) {
        if let Some(raw) = event.magnitude_raw {
            if (1.0..FATALITY_THRESHOLD).contains(&raw) {
                return Some(SeverityOutcome {
                    priority: Priority::P2,
                    reason: format!("Fatalities: {}", raw as i64),
                });
            }
        }
    }

    if matches!(event.category, Category::Political | Category::Regulatory)
        && event.magnitude_norm.map(|m| m > 0.7).unwrap_or(false)
        && event.direction == Direction::Negative
    {
        return Some(SeverityOutcome {
            priority: Priority::P2,
            reason: "Significant policy/regulatory event".to_string(),
        });
    }

    if event.magnitude_unit == Some(MagnitudeUnit::PercentChange) {
        if let Some(raw) = event.magnitude_raw {
            if raw.abs() > 10.0 {
                return Some(SeverityOutcome {
                    priority: Priority::P2,
                    reason: format!("Major economic shift: {raw:.1}%"),
                });
            }
        }
    }

    if event.category == Category::Conflict
        && event.magnitude_norm.map(|m| m > 0.5).unwrap_or(false)
        && event.admin1.is_some()
    {
        return Some(SeverityOutcome {
            priority: Priority::P2,
            reason: "Significant regional conflict event".to_string(),
        });
    }

    None
}

fn p3(event: &Event) -> Option<SeverityOutcome> {
    if event.direction == Direction::Negative {
        if let Some(m) = event.magnitude_norm {
            if m > 0.3 && m <= 0.7 {
                return Some(SeverityOutcome {
                    priority: Priority::P3,
                    reason: "Moderate negative event".to_string(),
                });
            }
        }
    }

    if let Some(event_type) = &event.event_type {
        let upper = event_type.to_uppercase();
        if (upper == "PROTEST" || upper == "PROTESTS")
            && event.magnitude_raw.map(|m| m == 0.0).unwrap_or(true)
        {
            return Some(SeverityOutcome {
                priority: Priority::P3,
                reason: "Protest activity (no casualties)".to_string(),
            });
        }
    }

    if event.category == Category::Regulatory && event.magnitude_norm.map(|m| m <= 0.5).unwrap_or(false) {
        return Some(SeverityOutcome {
            priority: Priority::P3,
            reason: "Minor regulatory event".to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Source;
    use chrono::Utc;
    use std::collections::HashMap;

    fn base_event() -> Event {
        let now = Utc::now();
        Event {
            id: "x".to_string(),
            source: Source::Gdelt,
            source_event_id: "1".to_string(),
            source_url: None,
            event_timestamp: now,
            ingested_at: now,
            created_at: now,
            category: Category::Political,
            subcategory: None,
            event_type: None,
            country_code: None,
            admin1: None,
            admin2: None,
            latitude: None,
            longitude: None,
            magnitude_raw: None,
            magnitude_unit: None,
            magnitude_norm: Some(0.2),
            direction: Direction::Neutral,
            tone_raw: None,
            tone_norm: None,
            num_sources: 1,
            source_credibility: 0.5,
            confidence: 0.5,
            actor1: None,
            actor2: None,
            commodities: vec![],
            sectors: vec![],
            themes: vec![],
            title: String::new(),
            content: String::new(),
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
            metadata: HashMap::new(),
        }
    }

    /// S3 — P1 auto-trigger.
    #[test]
    fn s3_coup_auto_trigger() {
        let mut e = base_event();
        e.event_type = Some("COUP".to_string());
        e.magnitude_norm = Some(0.2);
        let outcome = classify(&e);
        assert_eq!(outcome.priority, Priority::P1);
        assert_eq!(outcome.reason, "Auto-trigger: COUP");
    }

    #[test]
    fn p1_fatality_threshold_is_inclusive() {
        let mut e = base_event();
        e.magnitude_unit = Some(MagnitudeUnit::Fatalities);
        e.magnitude_raw = Some(10.0);
        assert_eq!(classify(&e).priority, Priority::P1);

        e.magnitude_raw = Some(9.999);
        assert_eq!(classify(&e).priority, Priority::P2);
    }

    #[test]
    fn p2_regional_conflict_requires_admin1() {
        let mut e = base_event();
        e.category = Category::Conflict;
        e.magnitude_norm = Some(0.6);
        assert_eq!(classify(&e).priority, Priority::P4);
        e.admin1 = Some("Zulia".to_string());
        assert_eq!(classify(&e).priority, Priority::P2);
    }

    #[test]
    fn p3_moderate_negative_band() {
        let mut e = base_event();
        e.direction = Direction::Negative;
        e.magnitude_norm = Some(0.5);
        assert_eq!(classify(&e).priority, Priority::P3);
    }

    #[test]
    fn default_is_p4() {
        let e = base_event();
        assert_eq!(classify(&e).priority, Priority::P4);
    }

    #[test]
    fn keyword_pattern_triggers_p1_regardless_of_magnitude() {
        let mut e = base_event();
        e.title = "Government moves to nationalize oil assets".to_string();
        assert_eq!(classify(&e).priority, Priority::P1);
    }
}
