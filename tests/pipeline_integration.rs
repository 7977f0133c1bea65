//! End-to-end test of the ingest -> analyze -> extract pipeline (§4.5, §8).
//!
//! Exercises a real `EventBus` with in-memory sqlite-backed stores and a
//! stub `ChatCompletionClient`, mirroring the teacher's pattern of driving
//! the library crate's public API directly rather than spawning the
//! compiled binary (see `backtest_run_integration.rs`'s component-level
//! tests). Async completion is awaited with the same poll-and-sleep idiom
//! `bus::tests` uses, since `EventBus` has no public drain/join API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;

use eventintel_backend::bus::{AnalyzeMessage, EventBus};
use eventintel_backend::entities::{EntityResolver, SanctionsScreener};
use eventintel_backend::event::{
    Actor, ActorType, Category, Direction, Event, Source,
};
use eventintel_backend::orchestrator::{AnalyzeStage, ExtractStage, IngestStage};
use eventintel_backend::scoring::{ChatCompletionClient, LlmAnalyzer, ModelTier};
use eventintel_backend::store::{
    EntityStore, EventStore, SqliteEntityStore, SqliteEventStore, SqliteSignalsStore,
};
use eventintel_backend::trending::TrendingLeaderboard;

/// Canned analysis payload matching C8's schema (`intelligence_schema_prompt`
/// in `scoring/llm.rs`), with a high risk score and an organization that
/// lines up with `sample_event`'s actors so extraction has something to
/// resolve.
const STUB_ANALYSIS_JSON: &str = r#"{
  "sentiment": {"score": -0.6, "label": "negative", "confidence": 0.8, "reasoning": "hostile rhetoric", "nuances": []},
  "summary": {"short": "Escalating unrest reported near the capital.", "key_points": ["troop movement", "curfew imposed"], "full": null},
  "entities": {
    "people": [],
    "organizations": [{"name": "Ministry of Defense", "role": "government", "relevance": 0.9}],
    "locations": []
  },
  "relationships": [],
  "risk": {"score": 0.9, "level": "critical", "reasoning": "military escalation", "factors": ["troop buildup"], "mitigation": []},
  "themes": ["unrest"],
  "urgency": "high",
  "language": "en"
}"#;

struct StubChatClient;

#[async_trait::async_trait]
impl ChatCompletionClient for StubChatClient {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str, _model: &str) -> anyhow::Result<String> {
        Ok(STUB_ANALYSIS_JSON.to_string())
    }
}

fn sample_event() -> Event {
    let now = Utc::now();
    Event {
        id: Event::stable_id(Source::Gdelt, "pipeline-test-1"),
        source: Source::Gdelt,
        source_event_id: "pipeline-test-1".into(),
        source_url: None,
        event_timestamp: now,
        ingested_at: now,
        created_at: now,
        category: Category::Conflict,
        subcategory: None,
        event_type: Some("ARMEDCONFLICT".to_string()),
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
        num_sources: 3,
        source_credibility: 0.8,
        confidence: 0.7,
        actor1: Some(Actor {
            name: "Ministry of Defense".into(),
            actor_type: ActorType::Government,
        }),
        actor2: None,
        commodities: vec![],
        sectors: vec![],
        themes: vec![],
        title: "Troops mobilized near capital amid escalating tensions".into(),
        content: "Government forces have mobilized near the capital following days of unrest.".into(),
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

#[tokio::test]
async fn ingest_to_extract_populates_scoring_and_entity_mentions() {
    let conn = Arc::new(parking_lot::Mutex::new(Connection::open_in_memory().unwrap()));
    conn.lock()
        .execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE events (
                id TEXT PRIMARY KEY, source TEXT NOT NULL, source_event_id TEXT NOT NULL,
                category TEXT NOT NULL, event_timestamp TEXT NOT NULL, ingested_at TEXT NOT NULL,
                country_code TEXT, priority TEXT, severity TEXT, risk_score REAL, payload_json TEXT NOT NULL
            );
            CREATE TABLE canonical_entities (
                id TEXT PRIMARY KEY, primary_name TEXT NOT NULL, entity_type TEXT NOT NULL,
                country_code TEXT, metadata_json TEXT NOT NULL, created_at TEXT NOT NULL, last_verified TEXT NOT NULL
            );
            CREATE TABLE entity_aliases (
                canonical_id TEXT NOT NULL, alias TEXT NOT NULL, alias_lower TEXT NOT NULL, source TEXT NOT NULL,
                confidence REAL NOT NULL, resolution_method TEXT NOT NULL, first_seen TEXT NOT NULL, last_seen TEXT NOT NULL,
                PRIMARY KEY (canonical_id, alias, source)
            );
            CREATE TABLE entity_mentions (
                event_id TEXT NOT NULL, canonical_id TEXT NOT NULL, raw_name TEXT NOT NULL,
                match_score REAL NOT NULL, relevance REAL NOT NULL, mentioned_at TEXT NOT NULL,
                PRIMARY KEY (event_id, canonical_id)
            );
            CREATE TABLE mention_spikes (
                event_id TEXT NOT NULL, spike_date TEXT NOT NULL, mention_count REAL NOT NULL,
                baseline_avg REAL NOT NULL, baseline_stddev REAL NOT NULL, z_score REAL NOT NULL,
                confidence TEXT NOT NULL, PRIMARY KEY (event_id, spike_date)
            );
            CREATE TABLE sanctions_matches (
                event_id TEXT NOT NULL, entity_name TEXT NOT NULL, entity_type TEXT NOT NULL, list TEXT NOT NULL,
                match_score REAL NOT NULL, raw_payload_json TEXT NOT NULL,
                PRIMARY KEY (event_id, entity_name, list)
            );
            "#,
        )
        .unwrap();

    let event_store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(conn.clone()));
    let entity_store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(conn.clone()));
    let signals_store = Arc::new(SqliteSignalsStore::new(conn.clone()));

    let analyzer = Arc::new(LlmAnalyzer::new(Box::new(StubChatClient), Duration::from_secs(300)));
    let sanctions = Arc::new(SanctionsScreener::new());
    let resolver = Arc::new(EntityResolver::new(entity_store.clone(), 3));
    let trending = Arc::new(TrendingLeaderboard::new(entity_store.clone()));

    let bus = Arc::new(EventBus::new(16, 2));

    bus.run_ingest(Arc::new(IngestStage {
        store: event_store.clone(),
        bus: bus.clone(),
        default_model_tier: ModelTier::Fast,
    }));
    bus.run_analyze(Arc::new(AnalyzeStage {
        store: event_store.clone(),
        analyzer,
        sanctions,
        signals: signals_store,
        bus: bus.clone(),
    }));
    bus.run_extract(Arc::new(ExtractStage {
        event_store: event_store.clone(),
        entity_store: entity_store.clone(),
        resolver,
        trending: trending.clone(),
    }));

    let event = sample_event();
    let event_id = event.id.clone();
    bus.publish_ingest(event).await.unwrap();

    let mut stored = None;
    for _ in 0..50 {
        if let Ok(Some(e)) = event_store.get(&event_id) {
            if e.risk_score.is_some() {
                stored = Some(e);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let stored = stored.expect("event was not fully scored within the poll window");

    assert!(stored.risk_score.unwrap() > 0.0);
    assert!(stored.severity.is_some());
    assert!(stored.priority.is_some());
    assert!(stored.llm_analysis.is_some());
    assert_eq!(stored.summary.as_deref(), Some("Escalating unrest reported near the capital."));

    let since = Utc::now() - chrono::Duration::hours(1);
    let mut mentions = Vec::new();
    for _ in 0..50 {
        mentions = entity_store
            .recent_mentions(since)
            .unwrap()
            .into_iter()
            .filter(|m| m.event_id == event_id)
            .collect::<Vec<_>>();
        if !mentions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!mentions.is_empty(), "extract stage never recorded an entity mention");
    assert!(mentions.iter().any(|m| m.raw_name == "Ministry of Defense"));

    let top = trending.top_n(10);
    assert!(
        top.iter().any(|(canonical_id, _)| *canonical_id == mentions[0].canonical_id),
        "trending leaderboard was not updated for the resolved entity"
    );

    assert!(bus.dlq_ingest.is_empty());
    assert!(bus.dlq_analyze.is_empty());
    assert!(bus.dlq_extract.is_empty());
}
