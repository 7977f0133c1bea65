//! Wires the bus handlers (C6) to the scoring pipeline (C2, C3, C7-C11), the
//! entity resolver (C12), the sanctions screener (C13), and the trending
//! leaderboard (C14). This module has no teacher-specific counterpart; it is
//! the generalization of the teacher's `main.rs` task-orchestration bodies
//! (`parallel_data_collection`, `wallet_analytics_polling`) into the
//! ingest/analyze/extract handler shape §4.5 specifies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use strsim::jaro_winkler;

use crate::bus::{AnalyzeHandler, AnalyzeMessage, EventBus, ExtractHandler, ExtractMessage, IngestHandler};
use crate::entities::{EntityResolver, SanctionsScreener};
use crate::error::{PipelineError, PipelineResult};
use crate::event::{Direction, EntityMention, EntityType, Event, Priority, Severity};
use crate::scoring::{
    composite_risk, derive_hybrid, quantitative_score, AggregatorInput, AnalysisContext, LlmAnalyzer, ModelTier,
    QuantitativeSignals,
};
use crate::store::{EntityStore, EventStore, SignalsStore};
use crate::trending::TrendingLeaderboard;

/// Source-provided names already resolved for an event are fuzzy-deduped
/// against the LLM's extracted names at this threshold to avoid
/// double-counting the same entity (§4.5).
const EXTRACT_DEDUP_THRESHOLD: f64 = 0.85;

/// Ingest handler (§4.5): idempotent upsert, then hand off to *analyze*.
pub struct IngestStage {
    pub store: Arc<dyn EventStore>,
    pub bus: Arc<EventBus>,
    pub default_model_tier: ModelTier,
}

#[async_trait]
impl IngestHandler for IngestStage {
    async fn handle(&self, event: &Event) -> PipelineResult<()> {
        self.store.upsert(event)?;
        self.bus
            .publish_analyze(AnalyzeMessage {
                event_id: event.id.clone(),
                model: self.default_model_tier,
                reanalyze: false,
            })
            .await
    }
}

/// Builds the C7 input from whatever quantitative signals the adapter stashed
/// under `metadata` (adapters only promise the canonical fields; the raw
/// source record, if any, rides along unobtrusively there per §9's design
/// note on an open `metadata` catch-all).
fn quantitative_signals_from_event(event: &Event) -> Option<QuantitativeSignals> {
    use crate::event::MagnitudeUnit;

    let goldstein_scale = if event.magnitude_unit == Some(MagnitudeUnit::Goldstein) {
        event.magnitude_raw
    } else {
        event.metadata.get("GoldsteinScale").and_then(|v| v.as_f64())
    };
    let avg_tone = event
        .tone_raw
        .or_else(|| event.metadata.get("AvgTone").and_then(|v| v.as_f64()));
    let num_mentions = event
        .metadata
        .get("NumMentions")
        .or_else(|| event.metadata.get("num_mentions"))
        .and_then(|v| v.as_u64())
        .map(|n| n as u32);

    if goldstein_scale.is_none() && avg_tone.is_none() && event.themes.is_empty() && num_mentions.is_none() {
        return None;
    }

    Some(QuantitativeSignals {
        goldstein_scale,
        avg_tone,
        themes: event.themes.clone(),
        num_mentions,
    })
}

/// Analyze handler (§4.5): C7 then C8 (C7's value injected as prompt
/// context), hybrid risk + severity via C9, then hands off to *extract*.
pub struct AnalyzeStage {
    pub store: Arc<dyn EventStore>,
    pub analyzer: Arc<LlmAnalyzer>,
    pub sanctions: Arc<SanctionsScreener>,
    pub signals: Arc<dyn SignalsStore>,
    pub bus: Arc<EventBus>,
}

#[async_trait]
impl AnalyzeHandler for AnalyzeStage {
    async fn handle(&self, msg: &AnalyzeMessage) -> PipelineResult<()> {
        let mut event = self
            .store
            .get(&msg.event_id)?
            .ok_or_else(|| PipelineError::bad_input(format!("analyze: unknown event {}", msg.event_id)))?;

        if event.llm_analysis.is_some() && !msg.reanalyze {
            tracing::debug!(event_id = %event.id, "analyze: already analyzed, skipping to extract");
            return self
                .bus
                .publish_extract(ExtractMessage { event_id: event.id.clone() })
                .await;
        }

        let signals = quantitative_signals_from_event(&event);
        let (quantitative, _renormalized) = signals
            .as_ref()
            .map(|s| quantitative_score(s, Default::default()))
            .map(|(score, renorm)| (Some(score), renorm))
            .unwrap_or((None, false));

        let ctx = AnalysisContext {
            source: event.source.as_str().to_string(),
            event_type: event.event_type.clone(),
            timestamp: event.event_timestamp,
            quantitative_hint: signals,
        };
        let analysis = self.analyzer.analyze(&event.title, &event.content, ctx, msg.model).await;

        let hybrid = derive_hybrid(quantitative, analysis.risk.score);

        let mut entity_names: HashMap<EntityType, Vec<String>> = HashMap::new();
        entity_names.insert(EntityType::Person, analysis.entities.people.iter().map(|e| e.name.clone()).collect());
        entity_names.insert(
            EntityType::Organization,
            analysis.entities.organizations.iter().map(|e| e.name.clone()).collect(),
        );
        let (sanctions_hit, matches) = self.sanctions.screen_event(&event.id, &entity_names);
        for m in &matches {
            if let Err(e) = self.signals.record_sanctions_match(m) {
                tracing::warn!(event_id = %event.id, error = %e.message, "failed to persist sanctions match");
            }
        }

        event.sentiment = Some(analysis.sentiment.score);
        event.risk_score = Some(hybrid.hybrid_score);
        event.severity = Some(hybrid.severity);
        event.urgency = analysis.urgency;
        event.language = analysis.language.clone();
        event.summary = Some(analysis.summary.short.clone());
        event.relationships = analysis.relationships.clone();
        event.themes = analysis.themes.clone();
        event.scoring_method = Some(hybrid.method.as_str().to_string());

        let priority_outcome = crate::severity::classify(&event);
        event.priority = Some(priority_outcome.priority);
        if priority_outcome.priority == Priority::P1 && event.risk_score.map(|r| r < 70.0).unwrap_or(true) {
            // P1's invariant floor (§3, §8 property 3) takes precedence over
            // the hybrid blend when the deterministic rule fires.
            event.risk_score = Some(event.risk_score.unwrap_or(0.0).max(70.0));
            event.severity = Some(Severity::from_hybrid_score(event.risk_score.unwrap()));
        }
        // C10's composite rides as a supplementary dimension under metadata:
        // C9's hybrid score stays authoritative for `risk_score`/`severity`
        // (the blend the analyze-handler contract and the hybrid-scoring
        // test scenarios describe), while the five-dimension aggregate is
        // exposed for reporting surfaces that want the fuller breakdown.
        let dimensional = composite_risk(
            &AggregatorInput {
                llm_base_risk: analysis.risk.score,
                sanctions_hit,
                sentiment: analysis.sentiment.score,
                urgency: analysis.urgency.unwrap_or(crate::event::Urgency::Low),
                themes: analysis.themes.clone(),
            },
            event.event_type.as_deref().unwrap_or("UNKNOWN"),
        );
        event.metadata.insert(
            "dimensional_risk".to_string(),
            serde_json::json!({
                "composite": dimensional.composite,
                "renormalized": dimensional.renormalized,
                "sanctions_hit": sanctions_hit,
                "priority_reason": priority_outcome.reason,
            }),
        );
        event.llm_analysis = Some(analysis);

        event.check_invariants()?;
        self.store.upsert(&event)?;

        self.bus
            .publish_extract(ExtractMessage { event_id: event.id.clone() })
            .await
    }
}

/// Extract handler (§4.5): resolves every named entity to a canonical id,
/// writes mentions, and updates the trending leaderboard.
pub struct ExtractStage {
    pub event_store: Arc<dyn EventStore>,
    pub entity_store: Arc<dyn EntityStore>,
    pub resolver: Arc<EntityResolver>,
    pub trending: Arc<TrendingLeaderboard>,
}

#[async_trait]
impl ExtractHandler for ExtractStage {
    async fn handle(&self, msg: &ExtractMessage) -> PipelineResult<()> {
        let event = self
            .event_store
            .get(&msg.event_id)?
            .ok_or_else(|| PipelineError::bad_input(format!("extract: unknown event {}", msg.event_id)))?;

        let mut candidates: Vec<(String, f64, EntityType)> = Vec::new();

        if let Some(analysis) = &event.llm_analysis {
            for person in &analysis.entities.people {
                candidates.push((person.name.clone(), person.relevance, EntityType::Person));
            }
            for org in &analysis.entities.organizations {
                candidates.push((org.name.clone(), org.relevance, EntityType::Organization));
            }
            for loc in &analysis.entities.locations {
                candidates.push((loc.name.clone(), loc.relevance, EntityType::Location));
            }
        }

        let mut source_names: Vec<(String, EntityType)> = Vec::new();
        if let Some(a1) = &event.actor1 {
            source_names.push((a1.name.clone(), actor_entity_type(a1.actor_type)));
        }
        if let Some(a2) = &event.actor2 {
            source_names.push((a2.name.clone(), actor_entity_type(a2.actor_type)));
        }

        for (raw_name, entity_type) in source_names {
            let already_covered = candidates
                .iter()
                .any(|(name, _, _)| jaro_winkler(&normalize(&raw_name), &normalize(name)) >= EXTRACT_DEDUP_THRESHOLD);
            if !already_covered {
                candidates.push((raw_name, 0.5, entity_type));
            }
        }

        for (raw_name, relevance, entity_type) in candidates {
            if raw_name.trim().is_empty() {
                continue;
            }
            let outcome = self
                .resolver
                .resolve(&raw_name, event.source, entity_type, event.country_code.as_deref())
                .await?;

            self.entity_store.insert_mention(&EntityMention {
                event_id: event.id.clone(),
                canonical_id: outcome.canonical_id.clone(),
                raw_name,
                match_score: outcome.confidence,
                relevance,
                mentioned_at: event.event_timestamp,
            })?;

            let weight = weight_for(&event);
            self.trending.record_mention(&outcome.canonical_id, weight, event.event_timestamp);
        }

        Ok(())
    }
}

fn actor_entity_type(actor_type: crate::event::ActorType) -> EntityType {
    use crate::event::ActorType;
    match actor_type {
        ActorType::Government | ActorType::Military => EntityType::Government,
        ActorType::Corporate => EntityType::Organization,
        ActorType::Rebel | ActorType::Civilian => EntityType::Person,
    }
}

/// Mention weight for the trending decay formula (§4.13): P1/negative
/// high-magnitude events move the leaderboard harder than routine mentions.
fn weight_for(event: &Event) -> f64 {
    let base = match event.priority {
        Some(Priority::P1) => 4.0,
        Some(Priority::P2) => 3.0,
        Some(Priority::P3) => 2.0,
        _ => 1.0,
    };
    if event.direction == Direction::Negative {
        base * 1.5
    } else {
        base
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect()
}

/// Standalone helper usable outside the bus (e.g. the CLI's dry-run path):
/// computes category sub-scores and the daily composite over an explicit
/// event window, without touching the bus or any store (C11, §4.10).
pub fn daily_composite_for_window(
    events: &[Event],
    weights: crate::scoring::CompositeWeights,
) -> crate::scoring::DailyComposite {
    let inputs: Vec<crate::scoring::CategoryInput> = events
        .iter()
        .filter_map(|e| {
            Some(crate::scoring::CategoryInput {
                category: e.category,
                risk_score: e.risk_score?,
                priority: e.priority?,
            })
        })
        .collect();
    let sub_scores = crate::scoring::category_sub_scores(&inputs);
    let p1_count = events.iter().filter(|e| e.priority == Some(Priority::P1)).count() as u32;
    crate::scoring::daily_composite(&sub_scores, weights, p1_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Category;

    #[test]
    fn weight_for_boosts_p1_and_negative_direction() {
        let mut event = sample_event();
        event.priority = Some(Priority::P1);
        event.direction = Direction::Negative;
        assert!((weight_for(&event) - 6.0).abs() < 1e-9);
    }

    fn sample_event() -> Event {
        let now = chrono::Utc::now();
        Event {
            id: "gdelt:1".into(),
            source: crate::event::Source::Gdelt,
            source_event_id: "1".into(),
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
            magnitude_norm: None,
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
}
