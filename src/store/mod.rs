//! Persistence layer: rusqlite-backed stores for events, entities, and
//! forecasts (SPEC_FULL.md Section A).
//!
//! Grounded in the teacher's `signals/db_storage.rs` (WAL pragma block,
//! `Arc<Mutex<Connection>>`, `INSERT OR IGNORE` + follow-up update for
//! idempotent writes, `prepare_cached` for hot queries) generalized from a
//! single `signals` table to the three stores this system needs.

pub mod adapter_health_store;
pub mod entity_store;
pub mod event_store;
pub mod forecast_store;
pub mod signals_store;

pub use adapter_health_store::{AdapterHealthStore, SqliteAdapterHealthStore};
pub use entity_store::{block_key, EntityStore, SqliteEntityStore};
pub use event_store::{EventStore, SqliteEventStore};
pub use forecast_store::{ForecastStore, SqliteForecastStore};
pub use signals_store::{SignalsStore, SqliteSignalsStore};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    source_event_id TEXT NOT NULL,
    category TEXT NOT NULL,
    event_timestamp TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    country_code TEXT,
    priority TEXT,
    severity TEXT,
    risk_score REAL,
    payload_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(event_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_events_category ON events(category, event_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_events_source ON events(source, source_event_id);
CREATE INDEX IF NOT EXISTS idx_events_priority ON events(priority, event_timestamp DESC) WHERE priority = 'P1';

CREATE TABLE IF NOT EXISTS canonical_entities (
    id TEXT PRIMARY KEY,
    primary_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    country_code TEXT,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_verified TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS entity_aliases (
    canonical_id TEXT NOT NULL,
    alias TEXT NOT NULL,
    alias_lower TEXT NOT NULL,
    source TEXT NOT NULL,
    confidence REAL NOT NULL,
    resolution_method TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (canonical_id, alias, source)
);

CREATE INDEX IF NOT EXISTS idx_entity_aliases_lookup ON entity_aliases(alias_lower, source);

CREATE TABLE IF NOT EXISTS entity_mentions (
    event_id TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    raw_name TEXT NOT NULL,
    match_score REAL NOT NULL,
    relevance REAL NOT NULL,
    mentioned_at TEXT NOT NULL,
    PRIMARY KEY (event_id, canonical_id)
);

CREATE INDEX IF NOT EXISTS idx_entity_mentions_canonical ON entity_mentions(canonical_id, mentioned_at DESC);

CREATE TABLE IF NOT EXISTS forecasts (
    entity_id TEXT NOT NULL,
    horizon TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, horizon)
);

CREATE TABLE IF NOT EXISTS mention_spikes (
    event_id TEXT NOT NULL,
    spike_date TEXT NOT NULL,
    mention_count REAL NOT NULL,
    baseline_avg REAL NOT NULL,
    baseline_stddev REAL NOT NULL,
    z_score REAL NOT NULL,
    confidence TEXT NOT NULL,
    PRIMARY KEY (event_id, spike_date)
);

CREATE INDEX IF NOT EXISTS idx_mention_spikes_date ON mention_spikes(spike_date DESC);

CREATE TABLE IF NOT EXISTS sanctions_matches (
    event_id TEXT NOT NULL,
    entity_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    list TEXT NOT NULL,
    match_score REAL NOT NULL,
    raw_payload_json TEXT NOT NULL,
    PRIMARY KEY (event_id, entity_name, list)
);

CREATE TABLE IF NOT EXISTS adapter_health (
    source_name TEXT PRIMARY KEY,
    last_run TEXT,
    last_success TEXT,
    total_runs INTEGER NOT NULL,
    success_rate REAL NOT NULL,
    last_events_count INTEGER NOT NULL,
    last_duration_ms INTEGER NOT NULL
);
"#;

/// Opens (creating if absent) a WAL-mode sqlite database and applies the
/// shared schema. All three stores share one connection, matching the
/// single-file-database deployment model this crate targets.
pub fn open(db_path: &str) -> Result<Arc<Mutex<Connection>>> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database at {db_path}"))?;
    conn.execute_batch(SCHEMA_SQL)
        .context("failed to initialize database schema")?;
    Ok(Arc::new(Mutex::new(conn)))
}
