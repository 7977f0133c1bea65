//! Entity relationship read-model (supplemental to C12): co-occurrence
//! graph and pairwise narrative, composed at read time from joins the
//! stores don't materialize themselves (entity mentions never back-point to
//! full event rows, so every read here re-joins through `EntityStore` and
//! `EventStore`).
//!
//! Grounded in `original_source/backend/api/views/graph.py` and
//! `services/graph_builder.py` for the `/graph/entities` shape and
//! `services/narrative_generator.py` for `/graph/narrative/{a}/{b}`; LLM
//! narrative generation reuses C8's `ChatCompletionClient`, not a new client.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::PipelineResult;
use crate::event::{EntityType, Event};
use crate::scoring::llm::ChatCompletionClient;
use crate::store::{EntityStore, EventStore};

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub entity_type: EntityType,
    pub mention_count: u32,
    pub avg_risk_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: u32,
    pub event_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EntityGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Co-occurrence graph over entity mentions in `[since, now)`: an edge per
/// entity pair mentioned on the same event, kept once its count clears
/// `min_cooccurrence`.
///
/// `graph_builder.py`'s community-detection pass has no counterpart here —
/// this crate has no clustering crate in its stack and no pack example
/// reaches for one for a read-model endpoint.
pub fn build_entity_graph(
    entity_store: &dyn EntityStore,
    event_store: &dyn EventStore,
    since: DateTime<Utc>,
    min_cooccurrence: u32,
) -> PipelineResult<EntityGraph> {
    let mentions = entity_store.recent_mentions(since)?;

    let mut by_event: HashMap<String, HashSet<String>> = HashMap::new();
    let mut mention_counts: HashMap<String, u32> = HashMap::new();
    for m in &mentions {
        by_event.entry(m.event_id.clone()).or_default().insert(m.canonical_id.clone());
        *mention_counts.entry(m.canonical_id.clone()).or_insert(0) += 1;
    }

    let mut pairs: HashMap<(String, String), Vec<String>> = HashMap::new();
    for (event_id, entities) in &by_event {
        let mut ids: Vec<&String> = entities.iter().collect();
        ids.sort();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                pairs.entry((ids[i].clone(), ids[j].clone())).or_default().push(event_id.clone());
            }
        }
    }

    let mut edges = Vec::new();
    let mut touched: HashSet<String> = HashSet::new();
    for ((a, b), event_ids) in pairs {
        let weight = event_ids.len() as u32;
        if weight < min_cooccurrence {
            continue;
        }
        touched.insert(a.clone());
        touched.insert(b.clone());
        edges.push(GraphEdge { source: a, target: b, weight, event_ids });
    }

    let mut nodes = Vec::new();
    for id in &touched {
        let Some(entity) = entity_store.get_canonical(id)? else {
            continue;
        };
        let risk_scores: Vec<f64> = entity_store
            .mentions_for(id, since)?
            .iter()
            .filter_map(|m| event_store.get(&m.event_id).ok().flatten())
            .filter_map(|e| e.risk_score)
            .collect();
        let avg_risk_score = if risk_scores.is_empty() {
            0.0
        } else {
            risk_scores.iter().sum::<f64>() / risk_scores.len() as f64
        };
        nodes.push(GraphNode {
            id: entity.id.clone(),
            label: entity.primary_name.clone(),
            entity_type: entity.entity_type,
            mention_count: mention_counts.get(id).copied().unwrap_or(0),
            avg_risk_score,
        });
    }

    Ok(EntityGraph { nodes, edges })
}

/// Events both entities are mentioned on, in `[since, now)`, oldest first —
/// the connecting-events query `narrative_generator.py`'s BigQuery join
/// performs, done here as an in-process intersection of two mention lists.
pub fn shared_events(
    entity_store: &dyn EntityStore,
    event_store: &dyn EventStore,
    entity_a_id: &str,
    entity_b_id: &str,
    since: DateTime<Utc>,
) -> PipelineResult<Vec<Event>> {
    let mentions_a = entity_store.mentions_for(entity_a_id, since)?;
    let mentions_b = entity_store.mentions_for(entity_b_id, since)?;
    let b_ids: HashSet<String> = mentions_b.iter().map(|m| m.event_id.clone()).collect();

    let mut events = Vec::new();
    for m in mentions_a {
        if b_ids.contains(&m.event_id) {
            if let Some(event) = event_store.get(&m.event_id)? {
                events.push(event);
            }
        }
    }
    events.sort_by_key(|e| e.event_timestamp);
    Ok(events)
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub event_timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityInfo {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeResponse {
    pub narrative: String,
    pub events: Vec<EventSummary>,
    pub entity_a: EntityInfo,
    pub entity_b: EntityInfo,
}

const NARRATIVE_SYSTEM_PROMPT: &str = "You are an intelligence analyst. Given two entities and the events that \
mention both of them, write a concise, factual 2-4 sentence narrative describing how they appear to relate. \
Do not speculate beyond what the events state.";

/// `/graph/narrative/{entity_a}/{entity_b}` (§6): `Ok(None)` means either id
/// is unknown (caller maps that to 404). An LLM failure falls back to a
/// generic message rather than failing the request, mirroring
/// `narrative_generator.py`'s catch-and-degrade behavior.
pub async fn relationship_narrative(
    entity_store: &dyn EntityStore,
    event_store: &dyn EventStore,
    chat_client: &dyn ChatCompletionClient,
    model: &str,
    entity_a_id: &str,
    entity_b_id: &str,
    since: DateTime<Utc>,
) -> PipelineResult<Option<NarrativeResponse>> {
    let (Some(entity_a), Some(entity_b)) =
        (entity_store.get_canonical(entity_a_id)?, entity_store.get_canonical(entity_b_id)?)
    else {
        return Ok(None);
    };

    let connecting = shared_events(entity_store, event_store, entity_a_id, entity_b_id, since)?;

    let narrative = if connecting.is_empty() {
        format!(
            "No direct connection found between {} and {} in recent events.",
            entity_a.primary_name, entity_b.primary_name
        )
    } else {
        let digest: Vec<String> = connecting
            .iter()
            .take(10)
            .map(|e| format!("- [{}] ({}): {}", e.event_timestamp.date_naive(), e.source.as_str(), e.title))
            .collect();
        let user_prompt = format!(
            "Entity A: {}\nEntity B: {}\nConnecting events:\n{}",
            entity_a.primary_name,
            entity_b.primary_name,
            digest.join("\n")
        );
        match chat_client.complete(NARRATIVE_SYSTEM_PROMPT, &user_prompt, model).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "narrative generation failed");
                "Unable to generate narrative at this time. Please try again later.".to_string()
            }
        }
    };

    let events = connecting
        .iter()
        .take(10)
        .map(|e| EventSummary {
            id: e.id.clone(),
            title: e.title.clone(),
            event_timestamp: e.event_timestamp,
            risk_score: e.risk_score.unwrap_or(0.0),
            severity: e.severity.map(|s| s.as_str().to_string()).unwrap_or_else(|| "unknown".to_string()),
        })
        .collect();

    Ok(Some(NarrativeResponse {
        narrative,
        events,
        entity_a: EntityInfo { id: entity_a.id, name: entity_a.primary_name, entity_type: entity_a.entity_type },
        entity_b: EntityInfo { id: entity_b.id, name: entity_b.primary_name, entity_type: entity_b.entity_type },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, Direction, EntityMention, Priority, Source};
    use parking_lot::Mutex;
    use rusqlite::Connection;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn schema_conn() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events (
                id TEXT PRIMARY KEY, source TEXT NOT NULL, source_event_id TEXT NOT NULL,
                category TEXT NOT NULL, event_timestamp TEXT NOT NULL, ingested_at TEXT NOT NULL,
                country_code TEXT, priority TEXT, severity TEXT, risk_score REAL, payload_json TEXT NOT NULL
            );
            CREATE TABLE canonical_entities (
                id TEXT PRIMARY KEY, primary_name TEXT NOT NULL, entity_type TEXT NOT NULL,
                country_code TEXT, metadata_json TEXT NOT NULL, created_at TEXT NOT NULL, last_verified TEXT NOT NULL
            );
            CREATE TABLE entity_aliases (
                canonical_id TEXT NOT NULL, alias TEXT NOT NULL, alias_lower TEXT NOT NULL,
                source TEXT NOT NULL, confidence REAL NOT NULL, resolution_method TEXT NOT NULL,
                first_seen TEXT NOT NULL, last_seen TEXT NOT NULL,
                PRIMARY KEY (canonical_id, alias, source)
            );
            CREATE TABLE entity_mentions (
                event_id TEXT NOT NULL, canonical_id TEXT NOT NULL, raw_name TEXT NOT NULL,
                match_score REAL NOT NULL, relevance REAL NOT NULL, mentioned_at TEXT NOT NULL,
                PRIMARY KEY (event_id, canonical_id)
            );",
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn sample_event(id: &str, ts: DateTime<Utc>, risk: f64) -> Event {
        Event {
            id: id.to_string(),
            source: Source::Gdelt,
            source_event_id: id.to_string(),
            source_url: None,
            event_timestamp: ts,
            ingested_at: ts,
            created_at: ts,
            category: Category::Conflict,
            subcategory: None,
            event_type: None,
            country_code: Some("VE".into()),
            admin1: None,
            admin2: None,
            latitude: None,
            longitude: None,
            magnitude_raw: None,
            magnitude_unit: None,
            magnitude_norm: None,
            direction: Direction::Negative,
            tone_raw: None,
            tone_norm: None,
            num_sources: 1,
            source_credibility: 0.7,
            confidence: 0.7,
            actor1: None,
            actor2: None,
            commodities: vec![],
            sectors: vec![],
            themes: vec![],
            title: format!("event {id}"),
            content: "c".into(),
            sentiment: None,
            risk_score: Some(risk),
            priority: Some(Priority::P2),
            severity: None,
            urgency: None,
            language: None,
            summary: None,
            relationships: vec![],
            llm_analysis: None,
            scoring_method: None,
            metadata: Map::new(),
        }
    }

    fn sample_entity(
        entity_store: &crate::store::SqliteEntityStore,
        id: &str,
        name: &str,
    ) {
        entity_store
            .insert_canonical(&crate::event::CanonicalEntity {
                id: id.to_string(),
                primary_name: name.to_string(),
                entity_type: EntityType::Person,
                country_code: Some("VE".into()),
                metadata: Map::new(),
                created_at: Utc::now(),
                last_verified: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn build_entity_graph_links_co_mentioned_entities() {
        let conn = schema_conn();
        let event_store = crate::store::SqliteEventStore::new(conn.clone());
        let entity_store = crate::store::SqliteEntityStore::new(conn.clone());

        let now = Utc::now();
        event_store.upsert(&sample_event("e1", now, 80.0)).unwrap();
        sample_entity(&entity_store, "ent-a", "Alice");
        sample_entity(&entity_store, "ent-b", "Bob");

        entity_store
            .insert_mention(&EntityMention {
                event_id: "e1".into(),
                canonical_id: "ent-a".into(),
                raw_name: "Alice".into(),
                match_score: 1.0,
                relevance: 1.0,
                mentioned_at: now,
            })
            .unwrap();
        entity_store
            .insert_mention(&EntityMention {
                event_id: "e1".into(),
                canonical_id: "ent-b".into(),
                raw_name: "Bob".into(),
                match_score: 1.0,
                relevance: 1.0,
                mentioned_at: now,
            })
            .unwrap();

        let since = now - chrono::Duration::days(1);
        let graph = build_entity_graph(&entity_store, &event_store, since, 1).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].weight, 1);
    }

    #[test]
    fn build_entity_graph_drops_pairs_below_threshold() {
        let conn = schema_conn();
        let event_store = crate::store::SqliteEventStore::new(conn.clone());
        let entity_store = crate::store::SqliteEntityStore::new(conn.clone());
        let now = Utc::now();
        event_store.upsert(&sample_event("e1", now, 50.0)).unwrap();
        sample_entity(&entity_store, "ent-a", "Alice");
        sample_entity(&entity_store, "ent-b", "Bob");
        entity_store
            .insert_mention(&EntityMention {
                event_id: "e1".into(),
                canonical_id: "ent-a".into(),
                raw_name: "Alice".into(),
                match_score: 1.0,
                relevance: 1.0,
                mentioned_at: now,
            })
            .unwrap();
        entity_store
            .insert_mention(&EntityMention {
                event_id: "e1".into(),
                canonical_id: "ent-b".into(),
                raw_name: "Bob".into(),
                match_score: 1.0,
                relevance: 1.0,
                mentioned_at: now,
            })
            .unwrap();

        let since = now - chrono::Duration::days(1);
        let graph = build_entity_graph(&entity_store, &event_store, since, 2).unwrap();
        assert!(graph.edges.is_empty());
        assert!(graph.nodes.is_empty());
    }

    #[test]
    fn shared_events_is_empty_with_no_common_event() {
        let conn = schema_conn();
        let event_store = crate::store::SqliteEventStore::new(conn.clone());
        let entity_store = crate::store::SqliteEntityStore::new(conn.clone());
        let now = Utc::now();
        let since = now - chrono::Duration::days(1);
        sample_entity(&entity_store, "ent-a", "Alice");
        sample_entity(&entity_store, "ent-b", "Bob");
        let shared = shared_events(&entity_store, &event_store, "ent-a", "ent-b", since).unwrap();
        assert!(shared.is_empty());
    }
}
