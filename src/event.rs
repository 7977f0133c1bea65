//! Canonical data model (C1): the single typed value object every adapter
//! output and every downstream analyzer funnels through. Unknown,
//! source-specific fields live under `metadata` only — nothing else in the
//! crate is allowed to rely on them (§9 DESIGN NOTES).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ErrorKind, PipelineError, PipelineResult};

/// Closed set of source tags (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Gdelt,
    Reliefweb,
    Fred,
    UnComtrade,
    WorldBank,
    GoogleTrends,
    SecEdgar,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Gdelt => "gdelt",
            Source::Reliefweb => "reliefweb",
            Source::Fred => "fred",
            Source::UnComtrade => "un_comtrade",
            Source::WorldBank => "world_bank",
            Source::GoogleTrends => "google_trends",
            Source::SecEdgar => "sec_edgar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gdelt" => Some(Source::Gdelt),
            "reliefweb" => Some(Source::Reliefweb),
            "fred" => Some(Source::Fred),
            "un_comtrade" => Some(Source::UnComtrade),
            "world_bank" => Some(Source::WorldBank),
            "google_trends" => Some(Source::GoogleTrends),
            "sec_edgar" => Some(Source::SecEdgar),
            _ => None,
        }
    }
}

/// 10-category taxonomy (§3, C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Political,
    Conflict,
    Economic,
    Trade,
    Regulatory,
    Infrastructure,
    Healthcare,
    Social,
    Environmental,
    Energy,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Political,
        Category::Conflict,
        Category::Economic,
        Category::Trade,
        Category::Regulatory,
        Category::Infrastructure,
        Category::Healthcare,
        Category::Social,
        Category::Environmental,
        Category::Energy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Political => "POLITICAL",
            Category::Conflict => "CONFLICT",
            Category::Economic => "ECONOMIC",
            Category::Trade => "TRADE",
            Category::Regulatory => "REGULATORY",
            Category::Infrastructure => "INFRASTRUCTURE",
            Category::Healthcare => "HEALTHCARE",
            Category::Social => "SOCIAL",
            Category::Environmental => "ENVIRONMENTAL",
            Category::Energy => "ENERGY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeUnit {
    Fatalities,
    Percent,
    Goldstein,
    Usd,
    InterestScore,
    PercentChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorType {
    Government,
    Military,
    Rebel,
    Civilian,
    Corporate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
}

/// Deterministic priority class (§4.4, C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }
}

/// Hybrid-score severity band (§4.8, C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
    Sev4,
    Sev5,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Sev1 => "SEV1",
            Severity::Sev2 => "SEV2",
            Severity::Sev3 => "SEV3",
            Severity::Sev4 => "SEV4",
            Severity::Sev5 => "SEV5",
        }
    }

    /// Maps a hybrid score H in [0,100] to its severity band (§4.8 table).
    /// Bands are inclusive on the lower bound (property 9).
    pub fn from_hybrid_score(h: f64) -> Self {
        if h < 20.0 {
            Severity::Sev1
        } else if h < 40.0 {
            Severity::Sev2
        } else if h < 60.0 {
            Severity::Sev3
        } else if h < 80.0 {
            Severity::Sev4
        } else {
            Severity::Sev5
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Immediate,
}

impl Urgency {
    /// `urgency_risk` dimension feeding C10.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Urgency::Low => 0.2,
            Urgency::Medium => 0.5,
            Urgency::High => 0.8,
            Urgency::Immediate => 1.0,
        }
    }
}

/// Structured output of C8, attached verbatim to the event as `llm_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmAnalysis {
    pub sentiment: SentimentBlock,
    pub summary: SummaryBlock,
    pub entities: EntitiesBlock,
    pub relationships: Vec<Relationship>,
    pub risk: RiskBlock,
    pub themes: Vec<String>,
    pub urgency: Option<Urgency>,
    pub language: Option<String>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl Default for SentimentLabel {
    fn default() -> Self {
        SentimentLabel::Neutral
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentimentBlock {
    pub score: f64,
    pub label: SentimentLabel,
    pub confidence: f64,
    pub reasoning: String,
    pub nuances: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummaryBlock {
    pub short: String,
    pub key_points: Vec<String>,
    pub full: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedEntity {
    pub name: String,
    /// `role` for people, `type` for organizations/locations.
    pub role: Option<String>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntitiesBlock {
    pub people: Vec<NamedEntity>,
    pub organizations: Vec<NamedEntity>,
    pub locations: Vec<NamedEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskBlock {
    pub score: f64,
    pub level: RiskLevel,
    pub reasoning: String,
    pub factors: Vec<String>,
    pub mitigation: Vec<String>,
}

/// The canonical event. Immutable after insert except for the enrichment
/// fields, which analyzers own (§3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    // Identity
    pub id: String,
    pub source: Source,
    pub source_event_id: String,
    pub source_url: Option<String>,

    // Temporal
    pub event_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    // Classification
    pub category: Category,
    pub subcategory: Option<String>,
    pub event_type: Option<String>,

    // Location
    pub country_code: Option<String>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // Magnitude
    pub magnitude_raw: Option<f64>,
    pub magnitude_unit: Option<MagnitudeUnit>,
    pub magnitude_norm: Option<f64>,

    // Direction
    pub direction: Direction,

    // Tone
    pub tone_raw: Option<f64>,
    pub tone_norm: Option<f64>,

    // Confidence
    pub num_sources: u32,
    pub source_credibility: f64,
    pub confidence: f64,

    // Actors
    pub actor1: Option<Actor>,
    pub actor2: Option<Actor>,

    // Taxonomic arrays
    pub commodities: Vec<String>,
    pub sectors: Vec<String>,
    pub themes: Vec<String>,

    // Title/content, consumed by C8; never shown to downstream scorers raw.
    pub title: String,
    pub content: String,

    // Enrichment (analyzer-owned)
    pub sentiment: Option<f64>,
    pub risk_score: Option<f64>,
    pub priority: Option<Priority>,
    pub severity: Option<Severity>,
    pub urgency: Option<Urgency>,
    pub language: Option<String>,
    pub summary: Option<String>,
    pub relationships: Vec<Relationship>,
    pub llm_analysis: Option<LlmAnalysis>,
    pub scoring_method: Option<String>,

    pub metadata: HashMap<String, Value>,
}

impl Event {
    /// Stable identity per Open Question #3: `(source, source_event_id)`.
    pub fn stable_id(source: Source, source_event_id: &str) -> String {
        format!("{}:{}", source.as_str(), source_event_id)
    }

    /// Invariant checks enforced by `validate` (§3, §8 property 1/2/3).
    /// Returns the first violation found, or `Ok(())`.
    pub fn check_invariants(&self) -> PipelineResult<()> {
        if self.event_timestamp > self.ingested_at || self.ingested_at > self.created_at {
            return Err(PipelineError::invariant_violation(
                "event_timestamp <= ingested_at <= created_at violated",
            ));
        }

        for (name, v) in [
            ("magnitude_norm", self.magnitude_norm),
            ("tone_norm", self.tone_norm),
        ] {
            if let Some(v) = v {
                if !(0.0..=1.0).contains(&v) {
                    return Err(PipelineError::invariant_violation(format!(
                        "{name} out of [0,1]: {v}"
                    )));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.source_credibility) {
            return Err(PipelineError::invariant_violation(
                "source_credibility out of [0,1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::invariant_violation("confidence out of [0,1]"));
        }
        if self.num_sources < 1 {
            return Err(PipelineError::invariant_violation("num_sources must be >= 1"));
        }
        if let Some(s) = self.sentiment {
            if !(-1.0..=1.0).contains(&s) {
                return Err(PipelineError::invariant_violation("sentiment out of [-1,1]"));
            }
        }
        if let Some(r) = self.risk_score {
            if !(0.0..=100.0).contains(&r) {
                return Err(PipelineError::invariant_violation("risk_score out of [0,100]"));
            }
        }
        if self.priority == Some(Priority::P1) {
            if self.risk_score.map(|r| r < 70.0).unwrap_or(false) {
                return Err(PipelineError::invariant_violation(
                    "severity P1 requires risk_score >= 70",
                ));
            }
        }
        if self.magnitude_raw.is_some() && self.magnitude_norm.is_none() {
            return Err(PipelineError::invariant_violation(
                "magnitude_raw present without computed magnitude_norm",
            ));
        }

        Ok(())
    }
}

/// Canonical long-lived entity (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Government,
    Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: String,
    pub primary_name: String,
    pub entity_type: EntityType,
    pub country_code: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_verified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Exact,
    Probabilistic,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub canonical_id: String,
    pub alias: String,
    pub source: Source,
    pub confidence: f64,
    pub resolution_method: ResolutionMethod,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub event_id: String,
    pub canonical_id: String,
    pub raw_name: String,
    pub match_score: f64,
    pub relevance: f64,
    pub mentioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeConfidence {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionSpike {
    pub event_id: String,
    pub spike_date: chrono::NaiveDate,
    pub mention_count: f64,
    pub baseline_avg: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub confidence: SpikeConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionsMatch {
    pub event_id: String,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub list: String,
    pub match_score: f64,
    pub raw_payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub entity_id: String,
    pub horizon: String,
    pub points: Vec<ForecastPoint>,
    pub generated_at: DateTime<Utc>,
}

impl ForecastResult {
    pub const STALENESS_THRESHOLD_HOURS: i64 = 24;

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.generated_at).num_hours() >= Self::STALENESS_THRESHOLD_HOURS
    }
}

/// Clips `v` into `[lo, hi]`.
pub fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Errors classified as `Permanent`/`BadInput` never abort the caller's
/// batch; this is the convenience the framework-provided `publish` helper
/// (§4.1) relies on.
pub fn is_batch_fatal(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::DependencyUnavailable | ErrorKind::Transient
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event() -> Event {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Event {
            id: Event::stable_id(Source::Gdelt, "123"),
            source: Source::Gdelt,
            source_event_id: "123".to_string(),
            source_url: None,
            event_timestamp: now,
            ingested_at: now,
            created_at: now,
            category: Category::Political,
            subcategory: None,
            event_type: None,
            country_code: Some("VE".to_string()),
            admin1: None,
            admin2: None,
            latitude: None,
            longitude: None,
            magnitude_raw: None,
            magnitude_unit: None,
            magnitude_norm: None,
            direction: Direction::Neutral,
            tone_raw: None,
            tone_norm: None,
            num_sources: 1,
            source_credibility: 0.6,
            confidence: 0.6,
            actor1: None,
            actor2: None,
            commodities: vec![],
            sectors: vec![],
            themes: vec![],
            title: "t".to_string(),
            content: "c".to_string(),
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

    #[test]
    fn stable_id_is_source_scoped() {
        assert_eq!(Event::stable_id(Source::Gdelt, "1"), "gdelt:1");
        assert_ne!(
            Event::stable_id(Source::Gdelt, "1"),
            Event::stable_id(Source::Fred, "1")
        );
    }

    #[test]
    fn clock_skew_invariant() {
        let mut e = base_event();
        e.ingested_at = e.event_timestamp - chrono::Duration::seconds(1);
        assert!(e.check_invariants().is_err());
    }

    #[test]
    fn p1_requires_high_risk_score() {
        let mut e = base_event();
        e.priority = Some(Priority::P1);
        e.risk_score = Some(69.9);
        assert!(e.check_invariants().is_err());
        e.risk_score = Some(70.0);
        assert!(e.check_invariants().is_ok());
    }

    #[test]
    fn severity_bands_are_lower_inclusive() {
        assert!(matches!(Severity::from_hybrid_score(20.0), Severity::Sev2));
        assert!(matches!(Severity::from_hybrid_score(19.999), Severity::Sev1));
        assert!(matches!(Severity::from_hybrid_score(40.0), Severity::Sev3));
        assert!(matches!(Severity::from_hybrid_score(60.0), Severity::Sev4));
        assert!(matches!(Severity::from_hybrid_score(80.0), Severity::Sev5));
        assert!(matches!(Severity::from_hybrid_score(100.0), Severity::Sev5));
    }

    #[test]
    fn clip_bounds_value() {
        assert_eq!(clip(-1.0, 0.0, 1.0), 0.0);
        assert_eq!(clip(2.0, 0.0, 1.0), 1.0);
        assert_eq!(clip(0.5, 0.0, 1.0), 0.5);
    }
}
