//! Process entry point: wires the adapter registry, event bus, scoring
//! pipeline, entity resolver, and trending leaderboard into a running
//! service, and fronts it with the HTTP surface the core itself defines as
//! its input/read-model contract (§6): adapter triggers, the correlation
//! endpoint, and the entity graph/narrative read-model. The chat surface
//! dashboards consume on top of that is an external collaborator (§1) and
//! lives outside this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventintel_backend::adapters::{AdapterHealth, AdapterRegistry, FetchWindow};
use eventintel_backend::bus::EventBus;
use eventintel_backend::config::Config;
use eventintel_backend::correlation::{self, CorrelationMethod, Series};
use eventintel_backend::entities::{EntityResolver, SanctionsScreener};
use eventintel_backend::error::PipelineError;
use eventintel_backend::graph::{self, EntityGraph, NarrativeResponse};
use eventintel_backend::orchestrator::{AnalyzeStage, ExtractStage, IngestStage};
use eventintel_backend::scoring::{ChatCompletionClient, HttpChatClient, LlmAnalyzer, ModelTier};
use eventintel_backend::secrets::SecretCache;
use eventintel_backend::store::{
    self, AdapterHealthStore, EntityStore, EventStore, SignalsStore, SqliteAdapterHealthStore, SqliteEntityStore,
    SqliteEventStore, SqliteSignalsStore,
};
use eventintel_backend::trending::TrendingLeaderboard;

#[derive(Clone)]
struct AppState {
    registry: Arc<AdapterRegistry>,
    bus: Arc<EventBus>,
    entity_store: Arc<dyn EntityStore>,
    event_store: Arc<dyn EventStore>,
    narrative_client: Arc<dyn ChatCompletionClient>,
    default_model_tier: ModelTier,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, db = %config.database_path, "starting eventintel pipeline");

    let conn = store::open(&config.database_path)
        .with_context(|| format!("failed to open column/relational store at {}", config.database_path))?;
    let event_store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(conn.clone()));
    let entity_store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(conn.clone()));
    let signals_store: Arc<dyn SignalsStore> = Arc::new(SqliteSignalsStore::new(conn.clone()));

    let secrets = SecretCache::from_env();
    let llm_api_key = secrets.get("LLM_API_KEY").await?.unwrap_or_default();
    let llm_endpoint = config
        .llm_endpoint
        .clone()
        .unwrap_or_else(|| "https://llm.internal.example/v1/chat/completions".to_string());
    let chat_client: Box<dyn ChatCompletionClient> =
        Box::new(HttpChatClient::new(llm_endpoint.clone(), llm_api_key.clone()));
    let analyzer = Arc::new(LlmAnalyzer::new(chat_client, config.llm_cache_ttl));
    // The narrative read-model (graph module) makes its own one-shot chat
    // calls and doesn't share C8's per-event cache, so it gets its own
    // client instance against the same endpoint/credentials.
    let narrative_client: Arc<dyn ChatCompletionClient> =
        Arc::new(HttpChatClient::new(llm_endpoint, llm_api_key));

    if config.opensanctions_api_key.is_some() {
        // Fetching the premium list itself is an external collaborator's
        // concern (§1); this build still screens against the free list.
        info!("premium sanctions watchlist credentials present, but fetch is not wired in this deployment");
    }
    let sanctions = Arc::new(SanctionsScreener::new());

    let resolver = Arc::new(EntityResolver::new(entity_store.clone(), config.resolver_max_retries));
    let trending = Arc::new(TrendingLeaderboard::new(entity_store.clone()));

    let registry = Arc::new(AdapterRegistry::discover());
    let health_store: Arc<dyn AdapterHealthStore> = Arc::new(SqliteAdapterHealthStore::new(conn.clone()));
    match health_store.load_all() {
        Ok(snapshot) => registry.restore_health(snapshot),
        Err(e) => warn!(error = %e, "failed to restore adapter health from previous run"),
    }
    spawn_health_flush_loop(registry.clone(), health_store);

    let bus = Arc::new(EventBus::new(config.analyze_prefetch, config.bus_max_retries));

    let default_model_tier = ModelTier::parse(&config.default_model_tier);

    bus.run_ingest(Arc::new(IngestStage {
        store: event_store.clone(),
        bus: bus.clone(),
        default_model_tier,
    }));
    bus.run_analyze(Arc::new(AnalyzeStage {
        store: event_store.clone(),
        analyzer,
        sanctions,
        signals: signals_store.clone(),
        bus: bus.clone(),
    }));
    bus.run_extract(Arc::new(ExtractStage {
        event_store: event_store.clone(),
        entity_store: entity_store.clone(),
        resolver,
        trending: trending.clone(),
    }));

    spawn_reconciliation_loop(trending.clone());

    let state = AppState {
        registry,
        bus,
        entity_store: entity_store.clone(),
        event_store: event_store.clone(),
        narrative_client,
        default_model_tier,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/trigger/:source", post(trigger_adapter))
        .route("/correlation/compute", post(compute_correlation))
        .route("/graph/entities", get(graph_entities))
        .route("/graph/narrative/:entity_a/:entity_b", get(graph_narrative))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "pipeline trigger surface listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Periodically flushes the adapter health map to the relational store so a
/// restart resumes from the last-known health instead of every adapter
/// reporting "never run" (SPEC_FULL.md's restart-survival extension to
/// §4.1). Five minutes trades a small window of potentially stale health on
/// an unclean shutdown for not hammering the store on every single run.
fn spawn_health_flush_loop(registry: Arc<AdapterRegistry>, health_store: Arc<dyn AdapterHealthStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
        loop {
            ticker.tick().await;
            for (source_name, health) in registry.health_snapshot() {
                if let Err(e) = health_store.put(&source_name, &health) {
                    warn!(error = %e, source = %source_name, "failed to persist adapter health");
                }
            }
        }
    });
}

/// Nightly reconciliation (§4.13): every 24h, replay the last 30 days of
/// mentions so the in-memory leaderboard cannot drift indefinitely from the
/// system of record.
fn spawn_reconciliation_loop(trending: Arc<TrendingLeaderboard>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3_600));
        loop {
            ticker.tick().await;
            match trending.reconcile() {
                Ok(replayed) => info!(replayed, "trending leaderboard reconciliation complete"),
                Err(e) => warn!(error = %e, "trending leaderboard reconciliation failed"),
            }
        }
    });
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sources: HashMap<String, AdapterHealth>,
    dlq: DlqCounts,
}

#[derive(Serialize)]
struct DlqCounts {
    ingest: usize,
    analyze: usize,
    extract: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let sources = state
        .registry
        .source_names()
        .into_iter()
        .filter_map(|name| state.registry.health(&name).map(|h| (name, h)))
        .collect();
    Json(HealthResponse {
        status: "ok",
        sources,
        dlq: DlqCounts {
            ingest: state.bus.dlq_ingest.len(),
            analyze: state.bus.dlq_analyze.len(),
            extract: state.bus.dlq_extract.len(),
        },
    })
}

#[derive(Deserialize, Default)]
struct TriggerRequest {
    lookback_minutes: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct TriggerResponse {
    status: &'static str,
    task_id: String,
    task_name: String,
    message: String,
}

/// `POST /trigger/<source>` (§6): the HTTP-triggered twin of a cron
/// invocation, both of which just call `publish` on the named adapter (§9).
async fn trigger_adapter(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, (StatusCode, String)> {
    let adapter = state
        .registry
        .get(&source)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown source: {source}")))?;

    let lookback_minutes = req.lookback_minutes.unwrap_or_else(|| adapter.default_lookback_minutes());
    let end = Utc::now();
    let start = end - chrono::Duration::minutes(i64::from(lookback_minutes));
    let window = FetchWindow {
        start,
        end,
        limit: req.limit.unwrap_or(500),
    };

    let bus = state.bus.clone();
    let task_id = uuid::Uuid::new_v4().to_string();
    let outcome = state
        .registry
        .run_once(&source, window, move |event| {
            let bus = bus.clone();
            tokio::spawn(async move {
                if let Err(e) = bus.publish_ingest(event).await {
                    warn!(error = %e, "failed to publish triggered event to ingest topic");
                }
            });
        })
        .await
        .map_err(|e: PipelineError| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(TriggerResponse {
        status: "accepted",
        task_id: task_id.clone(),
        task_name: format!("trigger-{source}"),
        message: format!(
            "published {} of {} fetched events",
            outcome.published,
            outcome.published + outcome.failed
        ),
    }))
}

#[derive(Deserialize)]
struct CorrelationRequest {
    variables: Vec<NamedSeries>,
    method: String,
    #[serde(default = "default_alpha")]
    alpha: f64,
    #[serde(default = "default_min_effect_size")]
    min_effect_size: f64,
}

fn default_alpha() -> f64 {
    0.05
}

fn default_min_effect_size() -> f64 {
    0.5
}

#[derive(Deserialize)]
struct NamedSeries {
    name: String,
    points: Vec<(DateTime<Utc>, f64)>,
}

/// `POST /correlation/compute` (§6, §4.14). Variable resolution against the
/// time-series read model (entity risk histories, macro indicator series,
/// event-type daily counts) is the caller's concern — an external query
/// surface backed by the column/relational stores (§1) — so this endpoint
/// takes the already-resolved dated series directly and runs C15 over them.
async fn compute_correlation(
    Json(req): Json<CorrelationRequest>,
) -> Result<Json<correlation::CorrelationReport>, (StatusCode, String)> {
    let method = CorrelationMethod::parse(&req.method)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown method: {}", req.method)))?;

    let series: Vec<Series> = req
        .variables
        .into_iter()
        .map(|v| Series {
            name: v.name,
            points: v.points.into_iter().map(|(ts, val)| (ts.date_naive(), val)).collect(),
        })
        .collect();

    let report = correlation::analyze(&series, method, req.alpha, req.min_effect_size);
    Ok(Json(report))
}

#[derive(Deserialize)]
struct GraphEntitiesQuery {
    #[serde(default = "default_time_range_days")]
    time_range_days: i64,
    #[serde(default = "default_min_cooccurrence")]
    min_cooccurrence: u32,
}

fn default_time_range_days() -> i64 {
    30
}

fn default_min_cooccurrence() -> u32 {
    3
}

/// `GET /graph/entities` (§6).
async fn graph_entities(
    State(state): State<AppState>,
    Query(q): Query<GraphEntitiesQuery>,
) -> Result<Json<EntityGraph>, (StatusCode, String)> {
    let since = Utc::now() - chrono::Duration::days(q.time_range_days);
    let result = graph::build_entity_graph(state.entity_store.as_ref(), state.event_store.as_ref(), since, q.min_cooccurrence)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(result))
}

/// `GET /graph/narrative/<entity_a>/<entity_b>` (§6): 404 when either id is
/// unknown, otherwise an LLM-generated relationship summary over their
/// shared events in the last 90 days.
async fn graph_narrative(
    State(state): State<AppState>,
    Path((entity_a, entity_b)): Path<(String, String)>,
) -> Result<Json<NarrativeResponse>, (StatusCode, String)> {
    let since = Utc::now() - chrono::Duration::days(90);
    let result = graph::relationship_narrative(
        state.entity_store.as_ref(),
        state.event_store.as_ref(),
        state.narrative_client.as_ref(),
        state.default_model_tier.model_name(),
        &entity_a,
        &entity_b,
        since,
    )
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    result
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown entity: {entity_a} or {entity_b}")))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventintel_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();
}
