//! Persistence for the two detector outputs that never get their own
//! lifecycle (C13 sanctions hits, C17 mention spikes): write-once rows a
//! reviewer can audit later, not read back into the scoring path.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{PipelineError, PipelineResult};
use crate::event::{EntityType, MentionSpike, SanctionsMatch, SpikeConfidence};

pub trait SignalsStore: Send + Sync {
    fn record_spike(&self, spike: &MentionSpike) -> PipelineResult<()>;

    fn record_sanctions_match(&self, m: &SanctionsMatch) -> PipelineResult<()>;

    fn spikes_for_event(&self, event_id: &str) -> PipelineResult<Vec<MentionSpike>>;

    fn sanctions_matches_for_event(&self, event_id: &str) -> PipelineResult<Vec<SanctionsMatch>>;
}

pub struct SqliteSignalsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSignalsStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
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

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "person" => EntityType::Person,
        "organization" => EntityType::Organization,
        "government" => EntityType::Government,
        _ => EntityType::Location,
    }
}

fn confidence_str(c: SpikeConfidence) -> &'static str {
    match c {
        SpikeConfidence::Medium => "medium",
        SpikeConfidence::High => "high",
        SpikeConfidence::Critical => "critical",
    }
}

fn parse_confidence(s: &str) -> SpikeConfidence {
    match s {
        "high" => SpikeConfidence::High,
        "critical" => SpikeConfidence::Critical,
        _ => SpikeConfidence::Medium,
    }
}

impl SignalsStore for SqliteSignalsStore {
    fn record_spike(&self, spike: &MentionSpike) -> PipelineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO mention_spikes (event_id, spike_date, mention_count, baseline_avg, baseline_stddev, z_score, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(event_id, spike_date) DO UPDATE SET
                mention_count = excluded.mention_count,
                baseline_avg = excluded.baseline_avg,
                baseline_stddev = excluded.baseline_stddev,
                z_score = excluded.z_score,
                confidence = excluded.confidence",
            params![
                spike.event_id,
                spike.spike_date.to_string(),
                spike.mention_count,
                spike.baseline_avg,
                spike.baseline_stddev,
                spike.z_score,
                confidence_str(spike.confidence),
            ],
        )
        .map_err(|e| PipelineError::transient(format!("spike insert failed: {e}")))?;
        Ok(())
    }

    fn record_sanctions_match(&self, m: &SanctionsMatch) -> PipelineResult<()> {
        let raw_payload_json = serde_json::to_string(&m.raw_payload).unwrap_or_default();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sanctions_matches (event_id, entity_name, entity_type, list, match_score, raw_payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(event_id, entity_name, list) DO UPDATE SET match_score = excluded.match_score",
            params![m.event_id, m.entity_name, entity_type_str(m.entity_type), m.list, m.match_score, raw_payload_json],
        )
        .map_err(|e| PipelineError::transient(format!("sanctions match insert failed: {e}")))?;
        Ok(())
    }

    fn spikes_for_event(&self, event_id: &str) -> PipelineResult<Vec<MentionSpike>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT event_id, spike_date, mention_count, baseline_avg, baseline_stddev, z_score, confidence
                 FROM mention_spikes WHERE event_id = ?1 ORDER BY spike_date ASC",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let spikes = stmt
            .query_map(params![event_id], |row| {
                let spike_date: String = row.get("spike_date")?;
                let confidence: String = row.get("confidence")?;
                Ok(MentionSpike {
                    event_id: row.get("event_id")?,
                    spike_date: chrono::NaiveDate::parse_from_str(&spike_date, "%Y-%m-%d")
                        .unwrap_or_else(|_| chrono::Utc::now().date_naive()),
                    mention_count: row.get("mention_count")?,
                    baseline_avg: row.get("baseline_avg")?,
                    baseline_stddev: row.get("baseline_stddev")?,
                    z_score: row.get("z_score")?,
                    confidence: parse_confidence(&confidence),
                })
            })
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(spikes)
    }

    fn sanctions_matches_for_event(&self, event_id: &str) -> PipelineResult<Vec<SanctionsMatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT event_id, entity_name, entity_type, list, match_score, raw_payload_json
                 FROM sanctions_matches WHERE event_id = ?1",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let matches = stmt
            .query_map(params![event_id], |row| {
                let entity_type: String = row.get("entity_type")?;
                let raw_payload_json: String = row.get("raw_payload_json")?;
                Ok(SanctionsMatch {
                    event_id: row.get("event_id")?,
                    entity_name: row.get("entity_name")?,
                    entity_type: parse_entity_type(&entity_type),
                    list: row.get("list")?,
                    match_score: row.get("match_score")?,
                    raw_payload: serde_json::from_str(&raw_payload_json).unwrap_or(serde_json::Value::Null),
                })
            })
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_schema() -> SqliteSignalsStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE mention_spikes (
                event_id TEXT NOT NULL, spike_date TEXT NOT NULL, mention_count REAL NOT NULL,
                baseline_avg REAL NOT NULL, baseline_stddev REAL NOT NULL, z_score REAL NOT NULL,
                confidence TEXT NOT NULL, PRIMARY KEY (event_id, spike_date)
            );
            CREATE TABLE sanctions_matches (
                event_id TEXT NOT NULL, entity_name TEXT NOT NULL, entity_type TEXT NOT NULL,
                list TEXT NOT NULL, match_score REAL NOT NULL, raw_payload_json TEXT NOT NULL,
                PRIMARY KEY (event_id, entity_name, list)
            );",
        )
        .unwrap();
        SqliteSignalsStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn spike_roundtrips() {
        let s = store_with_schema();
        let spike = MentionSpike {
            event_id: "ev1".into(),
            spike_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            mention_count: 60.0,
            baseline_avg: 10.0,
            baseline_stddev: 10.0,
            z_score: 5.0,
            confidence: SpikeConfidence::Critical,
        };
        s.record_spike(&spike).unwrap();
        let found = s.spikes_for_event("ev1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, SpikeConfidence::Critical);
    }

    #[test]
    fn sanctions_match_roundtrips() {
        let s = store_with_schema();
        let m = SanctionsMatch {
            event_id: "ev1".into(),
            entity_name: "Test Entity".into(),
            entity_type: EntityType::Organization,
            list: "FREE_WATCHLIST".into(),
            match_score: 0.9,
            raw_payload: serde_json::json!({"note": "test"}),
        };
        s.record_sanctions_match(&m).unwrap();
        let found = s.sanctions_matches_for_event("ev1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_name, "Test Entity");
    }
}
