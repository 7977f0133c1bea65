//! Canonical entity persistence (C12 storage side): canonical entities,
//! their aliases, and event mentions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PipelineError, PipelineResult};
use crate::event::{CanonicalEntity, EntityAlias, EntityMention, EntityType, ResolutionMethod, Source};

pub trait EntityStore: Send + Sync {
    fn insert_canonical(&self, entity: &CanonicalEntity) -> PipelineResult<()>;

    fn get_canonical(&self, id: &str) -> PipelineResult<Option<CanonicalEntity>>;

    /// Exact-match tier lookup: case-insensitive `(alias, source)` → canonical id.
    fn find_by_alias(&self, alias: &str, source: Source) -> PipelineResult<Option<EntityAlias>>;

    /// Candidate pool for the probabilistic tier, blocked by a coarse key
    /// (first 3 chars of the normalized name + country + entity type) so the
    /// Jaro-Winkler pass in the resolver never scans the whole table.
    fn candidates_by_block(&self, block_key: &str, entity_type: EntityType) -> PipelineResult<Vec<CanonicalEntity>>;

    fn insert_alias(&self, alias: &EntityAlias) -> PipelineResult<()>;

    fn insert_mention(&self, mention: &EntityMention) -> PipelineResult<()>;

    fn aliases_for(&self, canonical_id: &str) -> PipelineResult<Vec<EntityAlias>>;

    fn mentions_for(&self, canonical_id: &str, since: DateTime<Utc>) -> PipelineResult<Vec<EntityMention>>;

    /// Every mention since `since`, across all entities — the replay source
    /// for the trending leaderboard's nightly reconciliation (§4.13).
    fn recent_mentions(&self, since: DateTime<Utc>) -> PipelineResult<Vec<EntityMention>>;
}

pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<CanonicalEntity> {
        let entity_type_str: String = row.get("entity_type")?;
        let metadata_json: String = row.get("metadata_json")?;
        let created_at: String = row.get("created_at")?;
        let last_verified: String = row.get("last_verified")?;

        Ok(CanonicalEntity {
            id: row.get("id")?,
            primary_name: row.get("primary_name")?,
            entity_type: parse_entity_type(&entity_type_str),
            country_code: row.get("country_code")?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_verified: DateTime::parse_from_rfc3339(&last_verified)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_alias(row: &rusqlite::Row) -> rusqlite::Result<EntityAlias> {
        let source_str: String = row.get("source")?;
        let method_str: String = row.get("resolution_method")?;
        let first_seen: String = row.get("first_seen")?;
        let last_seen: String = row.get("last_seen")?;

        Ok(EntityAlias {
            canonical_id: row.get("canonical_id")?,
            alias: row.get("alias")?,
            source: Source::parse(&source_str).unwrap_or(Source::Gdelt),
            confidence: row.get("confidence")?,
            resolution_method: parse_resolution_method(&method_str),
            first_seen: DateTime::parse_from_rfc3339(&first_seen).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            last_seen: DateTime::parse_from_rfc3339(&last_seen).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Blocking key used by both the resolver's write path and its candidate
/// fan-out read (§4.11): must stay in sync with how candidates are queried.
pub fn block_key(primary_name: &str, country_code: Option<&str>) -> String {
    let normalized: String = primary_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(3)
        .collect();
    format!("{normalized}:{}", country_code.unwrap_or("XX"))
}

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "person" => EntityType::Person,
        "organization" => EntityType::Organization,
        "government" => EntityType::Government,
        _ => EntityType::Location,
    }
}

fn entity_type_str(t: EntityType) -> &'static str {
    match t {
        EntityType::Person => "person",
        EntityType::Organization => "organization",
        EntityType::Government => "government",
        EntityType::Location => "location",
    }
}

fn parse_resolution_method(s: &str) -> ResolutionMethod {
    match s {
        "probabilistic" => ResolutionMethod::Probabilistic,
        "llm" => ResolutionMethod::Llm,
        _ => ResolutionMethod::Exact,
    }
}

fn resolution_method_str(m: ResolutionMethod) -> &'static str {
    match m {
        ResolutionMethod::Exact => "exact",
        ResolutionMethod::Probabilistic => "probabilistic",
        ResolutionMethod::Llm => "llm",
    }
}

impl EntityStore for SqliteEntityStore {
    fn insert_canonical(&self, entity: &CanonicalEntity) -> PipelineResult<()> {
        let metadata_json = serde_json::to_string(&entity.metadata).unwrap_or_default();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO canonical_entities (id, primary_name, entity_type, country_code, metadata_json, created_at, last_verified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET last_verified = excluded.last_verified",
            params![
                entity.id,
                entity.primary_name,
                entity_type_str(entity.entity_type),
                entity.country_code,
                metadata_json,
                entity.created_at.to_rfc3339(),
                entity.last_verified.to_rfc3339(),
            ],
        )
        .map_err(|e| PipelineError::transient(format!("canonical entity insert failed: {e}")))?;
        Ok(())
    }

    fn get_canonical(&self, id: &str) -> PipelineResult<Option<CanonicalEntity>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, primary_name, entity_type, country_code, metadata_json, created_at, last_verified
             FROM canonical_entities WHERE id = ?1",
            params![id],
            Self::row_to_entity,
        )
        .optional()
        .map_err(|e| PipelineError::transient(format!("canonical entity lookup failed: {e}")))
    }

    fn find_by_alias(&self, alias: &str, source: Source) -> PipelineResult<Option<EntityAlias>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT canonical_id, alias, source, confidence, resolution_method, first_seen, last_seen
             FROM entity_aliases WHERE alias_lower = ?1 AND source = ?2
             ORDER BY confidence DESC LIMIT 1",
            params![alias.to_lowercase(), source.as_str()],
            Self::row_to_alias,
        )
        .optional()
        .map_err(|e| PipelineError::transient(format!("alias lookup failed: {e}")))
    }

    fn candidates_by_block(&self, block_key: &str, entity_type: EntityType) -> PipelineResult<Vec<CanonicalEntity>> {
        // block_key already encodes name-prefix + country; entity_type is an
        // additional in-process filter rather than a stored column, keeping
        // the schema narrow (§4.11 blocking is a resolver-side concern).
        let conn = self.conn.lock();
        let name_prefix = block_key.split(':').next().unwrap_or("");
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, primary_name, entity_type, country_code, metadata_json, created_at, last_verified
                 FROM canonical_entities
                 WHERE lower(substr(primary_name, 1, 3)) = ?1 AND entity_type = ?2",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;

        let entities = stmt
            .query_map(params![name_prefix, entity_type_str(entity_type)], Self::row_to_entity)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entities)
    }

    fn insert_alias(&self, alias: &EntityAlias) -> PipelineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entity_aliases (canonical_id, alias, alias_lower, source, confidence, resolution_method, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(canonical_id, alias, source) DO UPDATE SET
                last_seen = excluded.last_seen,
                confidence = excluded.confidence",
            params![
                alias.canonical_id,
                alias.alias,
                alias.alias.to_lowercase(),
                alias.source.as_str(),
                alias.confidence,
                resolution_method_str(alias.resolution_method),
                alias.first_seen.to_rfc3339(),
                alias.last_seen.to_rfc3339(),
            ],
        )
        .map_err(|e| PipelineError::transient(format!("alias insert failed: {e}")))?;
        Ok(())
    }

    fn insert_mention(&self, mention: &EntityMention) -> PipelineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entity_mentions (event_id, canonical_id, raw_name, match_score, relevance, mentioned_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(event_id, canonical_id) DO UPDATE SET match_score = excluded.match_score",
            params![
                mention.event_id,
                mention.canonical_id,
                mention.raw_name,
                mention.match_score,
                mention.relevance,
                mention.mentioned_at.to_rfc3339(),
            ],
        )
        .map_err(|e| PipelineError::transient(format!("mention insert failed: {e}")))?;
        Ok(())
    }

    fn aliases_for(&self, canonical_id: &str) -> PipelineResult<Vec<EntityAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT canonical_id, alias, source, confidence, resolution_method, first_seen, last_seen
                 FROM entity_aliases WHERE canonical_id = ?1",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let aliases = stmt
            .query_map(params![canonical_id], Self::row_to_alias)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(aliases)
    }

    fn mentions_for(&self, canonical_id: &str, since: DateTime<Utc>) -> PipelineResult<Vec<EntityMention>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT event_id, canonical_id, raw_name, match_score, relevance, mentioned_at
                 FROM entity_mentions WHERE canonical_id = ?1 AND mentioned_at >= ?2
                 ORDER BY mentioned_at ASC",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let mentions = stmt
            .query_map(params![canonical_id, since.to_rfc3339()], Self::row_to_mention)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(mentions)
    }

    fn recent_mentions(&self, since: DateTime<Utc>) -> PipelineResult<Vec<EntityMention>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT event_id, canonical_id, raw_name, match_score, relevance, mentioned_at
                 FROM entity_mentions WHERE mentioned_at >= ?1
                 ORDER BY mentioned_at ASC",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let mentions = stmt
            .query_map(params![since.to_rfc3339()], Self::row_to_mention)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(mentions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn store_with_schema() -> SqliteEntityStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE canonical_entities (
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
        SqliteEntityStore::new(Arc::new(Mutex::new(conn)))
    }

    fn sample_entity(id: &str, name: &str) -> CanonicalEntity {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        CanonicalEntity {
            id: id.to_string(),
            primary_name: name.to_string(),
            entity_type: EntityType::Person,
            country_code: Some("VE".into()),
            metadata: HashMap::new(),
            created_at: now,
            last_verified: now,
        }
    }

    #[test]
    fn alias_lookup_is_case_insensitive() {
        let s = store_with_schema();
        let entity = sample_entity("ent-1", "Nicolas Maduro");
        s.insert_canonical(&entity).unwrap();
        let now = entity.created_at;
        s.insert_alias(&EntityAlias {
            canonical_id: "ent-1".into(),
            alias: "Maduro".into(),
            source: Source::Gdelt,
            confidence: 1.0,
            resolution_method: ResolutionMethod::Exact,
            first_seen: now,
            last_seen: now,
        })
        .unwrap();

        let found = s.find_by_alias("MADURO", Source::Gdelt).unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().canonical_id, "ent-1");
    }

    #[test]
    fn candidates_by_block_filters_on_prefix_and_type() {
        let s = store_with_schema();
        s.insert_canonical(&sample_entity("ent-1", "Maduro")).unwrap();
        s.insert_canonical(&sample_entity("ent-2", "Madrid")).unwrap();

        let key = block_key("Maduro", Some("VE"));
        let candidates = s.candidates_by_block(&key, EntityType::Person).unwrap();
        assert_eq!(candidates.len(), 2);
    }
}
