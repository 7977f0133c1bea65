//! Entity resolver (C12): maps a raw, source-provided name onto a canonical
//! entity through three tiers — exact alias, probabilistic (blocked
//! Jaro-Winkler), and create-new (§4.11).
//!
//! Grounded in the teacher's retry-on-conflict idiom for contended writes
//! (`signals/db_storage.rs`'s `INSERT OR IGNORE` + recheck pattern,
//! generalized here to a counted retry loop since sqlite surfaces
//! uniqueness conflicts as an error rather than a silent no-op for this
//! table's `PRIMARY KEY`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::event::{CanonicalEntity, EntityAlias, EntityType, ResolutionMethod, Source};
use crate::store::EntityStore;

/// Exact-alias tier only trusts a stored alias at or above this confidence (§4.11).
pub const EXACT_ALIAS_MIN_CONFIDENCE: f64 = 0.95;

/// Probabilistic tier match floor (§4.11).
pub const PROBABILISTIC_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverOutcome {
    pub canonical_id: String,
    pub confidence: f64,
    pub method: ResolutionMethod,
}

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    max_retries: u32,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub async fn resolve(
        &self,
        raw_name: &str,
        source: Source,
        entity_type: EntityType,
        country_code: Option<&str>,
    ) -> PipelineResult<ResolverOutcome> {
        if let Some(outcome) = self.try_exact_alias(raw_name, source)? {
            return Ok(outcome);
        }

        if let Some(outcome) = self.try_probabilistic(raw_name, entity_type, country_code)? {
            self.link_alias(&outcome.canonical_id, raw_name, source, outcome.confidence, ResolutionMethod::Probabilistic)?;
            return Ok(outcome);
        }

        self.create_new_with_retry(raw_name, source, entity_type, country_code).await
    }

    fn try_exact_alias(&self, raw_name: &str, source: Source) -> PipelineResult<Option<ResolverOutcome>> {
        let Some(alias) = self.store.find_by_alias(raw_name, source)? else {
            return Ok(None);
        };
        if alias.confidence < EXACT_ALIAS_MIN_CONFIDENCE {
            return Ok(None);
        }
        let now = Utc::now();
        self.store.insert_alias(&EntityAlias {
            canonical_id: alias.canonical_id.clone(),
            alias: alias.alias.clone(),
            source,
            confidence: alias.confidence,
            resolution_method: ResolutionMethod::Exact,
            first_seen: alias.first_seen,
            last_seen: now,
        })?;
        Ok(Some(ResolverOutcome {
            canonical_id: alias.canonical_id,
            confidence: alias.confidence,
            method: ResolutionMethod::Exact,
        }))
    }

    fn try_probabilistic(
        &self,
        raw_name: &str,
        entity_type: EntityType,
        country_code: Option<&str>,
    ) -> PipelineResult<Option<ResolverOutcome>> {
        let key = crate::store::block_key(raw_name, country_code);
        let candidates = self.store.candidates_by_block(&key, entity_type)?;

        let mut best: Option<(String, f64)> = None;
        for candidate in candidates {
            let score = strsim::jaro_winkler(&normalize(raw_name), &normalize(&candidate.primary_name));
            if score >= PROBABILISTIC_THRESHOLD {
                let better = best.as_ref().map(|(_, s)| score > *s).unwrap_or(true);
                if better {
                    best = Some((candidate.id, score));
                }
            }
        }

        Ok(best.map(|(canonical_id, confidence)| ResolverOutcome {
            canonical_id,
            confidence,
            method: ResolutionMethod::Probabilistic,
        }))
    }

    async fn create_new_with_retry(
        &self,
        raw_name: &str,
        source: Source,
        entity_type: EntityType,
        country_code: Option<&str>,
    ) -> PipelineResult<ResolverOutcome> {
        let mut attempt = 0;
        loop {
            match self.create_new(raw_name, source, entity_type, country_code) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.max_retries && is_conflict(&e) => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
                    // Another writer may have just created this canonical
                    // row; recheck the exact-alias tier before inserting again.
                    if let Some(outcome) = self.try_exact_alias(raw_name, source)? {
                        return Ok(outcome);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn create_new(
        &self,
        raw_name: &str,
        source: Source,
        entity_type: EntityType,
        country_code: Option<&str>,
    ) -> PipelineResult<ResolverOutcome> {
        let now = Utc::now();
        let canonical_id = Uuid::new_v4().to_string();

        self.store.insert_canonical(&CanonicalEntity {
            id: canonical_id.clone(),
            primary_name: raw_name.to_string(),
            entity_type,
            country_code: country_code.map(String::from),
            metadata: Default::default(),
            created_at: now,
            last_verified: now,
        })?;

        self.link_alias(&canonical_id, raw_name, source, 1.0, ResolutionMethod::Exact)?;

        Ok(ResolverOutcome {
            canonical_id,
            confidence: 1.0,
            method: ResolutionMethod::Exact,
        })
    }

    fn link_alias(
        &self,
        canonical_id: &str,
        raw_name: &str,
        source: Source,
        confidence: f64,
        method: ResolutionMethod,
    ) -> PipelineResult<()> {
        let now = Utc::now();
        self.store.insert_alias(&EntityAlias {
            canonical_id: canonical_id.to_string(),
            alias: raw_name.to_string(),
            source,
            confidence,
            resolution_method: method,
            first_seen: now,
            last_seen: now,
        })
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect()
}

fn is_conflict(err: &PipelineError) -> bool {
    err.message.contains("UNIQUE constraint") || err.message.contains("constraint failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entity_store::SqliteEntityStore;
    use rusqlite::Connection;

    fn resolver() -> EntityResolver {
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
        let store: Arc<dyn EntityStore> = Arc::new(SqliteEntityStore::new(Arc::new(parking_lot::Mutex::new(conn))));
        EntityResolver::new(store, 3)
    }

    #[tokio::test]
    async fn first_resolve_creates_new_canonical_entity() {
        let r = resolver();
        let outcome = r.resolve("Nicolas Maduro", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        assert_eq!(outcome.method, ResolutionMethod::Exact);
        assert_eq!(outcome.confidence, 1.0);
    }

    #[tokio::test]
    async fn second_resolve_of_same_name_hits_exact_alias() {
        let r = resolver();
        let first = r.resolve("Nicolas Maduro", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        let second = r.resolve("Nicolas Maduro", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        assert_eq!(first.canonical_id, second.canonical_id);
        assert_eq!(second.method, ResolutionMethod::Exact);
    }

    #[tokio::test]
    async fn near_duplicate_name_resolves_probabilistically() {
        let r = resolver();
        let first = r.resolve("Nicolas Maduro", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        let second = r.resolve("Nicolas Maduro Moros", Source::Reliefweb, EntityType::Person, Some("VE")).await.unwrap();
        assert_eq!(first.canonical_id, second.canonical_id);
        assert_eq!(second.method, ResolutionMethod::Probabilistic);
    }

    #[tokio::test]
    async fn unrelated_name_creates_a_distinct_entity() {
        let r = resolver();
        let first = r.resolve("Nicolas Maduro", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        let second = r.resolve("Juan Guaido", Source::Gdelt, EntityType::Person, Some("VE")).await.unwrap();
        assert_ne!(first.canonical_id, second.canonical_id);
    }
}
