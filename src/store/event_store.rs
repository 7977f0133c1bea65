//! Event persistence (C1 storage side): idempotent upsert keyed on
//! `Event::stable_id`, plus the read patterns the scoring and read-model
//! layers need (category windows, P1 counts, recency).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PipelineError, PipelineResult};
use crate::event::{Category, Event};

pub trait EventStore: Send + Sync {
    /// Inserts the event if its id is unseen, else overwrites it in place
    /// (the enrichment stages re-save the same id with `risk_score`,
    /// `severity`, and `llm_analysis` populated). Returns `true` on a
    /// genuine first insert, `false` when the id already existed — the
    /// at-least-once + dedup contract (§4.1) cares about the latter for
    /// ingest-time duplicate detection, not about whether bytes changed.
    fn upsert(&self, event: &Event) -> PipelineResult<bool>;

    fn get(&self, id: &str) -> PipelineResult<Option<Event>>;

    fn exists(&self, id: &str) -> PipelineResult<bool>;

    fn recent(&self, limit: usize) -> PipelineResult<Vec<Event>>;

    /// Events of `category` with `event_timestamp` in `[start, end)`.
    fn in_window(&self, category: Option<Category>, start: DateTime<Utc>, end: DateTime<Utc>) -> PipelineResult<Vec<Event>>;

    /// Count of P1 events with `event_timestamp` in `[start, end)`, for C11's
    /// daily composite boost.
    fn count_p1_in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PipelineResult<u32>;
}

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let payload_json: String = row.get("payload_json")?;
        serde_json::from_str(&payload_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
    }
}

impl EventStore for SqliteEventStore {
    fn upsert(&self, event: &Event) -> PipelineResult<bool> {
        let payload_json = serde_json::to_string(event)
            .map_err(|e| PipelineError::bad_input(format!("event not serializable: {e}")))?;
        let conn = self.conn.lock();

        let was_new = !conn
            .query_row("SELECT 1 FROM events WHERE id = ?1", params![event.id], |_| Ok(()))
            .optional()
            .map_err(|e| PipelineError::transient(format!("event lookup failed: {e}")))?
            .is_some();

        conn.execute(
            "INSERT INTO events
             (id, source, source_event_id, category, event_timestamp, ingested_at,
              country_code, priority, severity, risk_score, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                priority = excluded.priority,
                severity = excluded.severity,
                risk_score = excluded.risk_score,
                payload_json = excluded.payload_json",
            params![
                event.id,
                event.source.as_str(),
                event.source_event_id,
                event.category.as_str(),
                event.event_timestamp.to_rfc3339(),
                event.ingested_at.to_rfc3339(),
                event.country_code,
                event.priority.map(|p| p.as_str()),
                event.severity.map(|s| s.as_str()),
                event.risk_score,
                payload_json,
            ],
        )
        .map_err(|e| PipelineError::transient(format!("event upsert failed: {e}")))?;

        Ok(was_new)
    }

    fn get(&self, id: &str) -> PipelineResult<Option<Event>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT payload_json FROM events WHERE id = ?1",
            params![id],
            |row| {
                let payload_json: String = row.get(0)?;
                Ok(payload_json)
            },
        )
        .optional()
        .map_err(|e| PipelineError::transient(format!("event lookup failed: {e}")))?
        .map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| PipelineError::invariant_violation(format!("stored event corrupt: {e}")))
        })
        .transpose()
    }

    fn exists(&self, id: &str) -> PipelineResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events WHERE id = ?1", params![id], |r| r.get(0))
            .map_err(|e| PipelineError::transient(format!("event existence check failed: {e}")))?;
        Ok(count > 0)
    }

    fn recent(&self, limit: usize) -> PipelineResult<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT payload_json FROM events ORDER BY event_timestamp DESC LIMIT ?1")
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;

        let events = stmt
            .query_map(params![limit as i64], Self::row_to_event)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(events)
    }

    fn in_window(&self, category: Option<Category>, start: DateTime<Utc>, end: DateTime<Utc>) -> PipelineResult<Vec<Event>> {
        let conn = self.conn.lock();
        let events = match category {
            Some(cat) => {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT payload_json FROM events
                         WHERE category = ?1 AND event_timestamp >= ?2 AND event_timestamp < ?3
                         ORDER BY event_timestamp ASC",
                    )
                    .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
                stmt.query_map(params![cat.as_str(), start.to_rfc3339(), end.to_rfc3339()], Self::row_to_event)
                    .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            None => {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT payload_json FROM events
                         WHERE event_timestamp >= ?1 AND event_timestamp < ?2
                         ORDER BY event_timestamp ASC",
                    )
                    .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
                stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], Self::row_to_event)
                    .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
                    .filter_map(|r| r.ok())
                    .collect()
            }
        };
        Ok(events)
    }

    fn count_p1_in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> PipelineResult<u32> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events
                 WHERE priority = 'P1' AND event_timestamp >= ?1 AND event_timestamp < ?2",
                params![start.to_rfc3339(), end.to_rfc3339()],
                |r| r.get(0),
            )
            .map_err(|e| PipelineError::transient(format!("p1 count failed: {e}")))?;
        Ok(count.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, Direction, Priority, Source};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn sample_event(id_suffix: &str, ts: DateTime<Utc>) -> Event {
        Event {
            id: Event::stable_id(Source::Gdelt, id_suffix),
            source: Source::Gdelt,
            source_event_id: id_suffix.to_string(),
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
            title: "t".into(),
            content: "c".into(),
            sentiment: None,
            risk_score: Some(75.0),
            priority: Some(Priority::P1),
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
    fn upsert_is_idempotent() {
        let s = store_with_schema();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let event = sample_event("1", now);
        assert!(s.upsert(&event).unwrap());
        assert!(!s.upsert(&event).unwrap());
        assert_eq!(s.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn in_window_filters_by_category_and_time() {
        let s = store_with_schema();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        s.upsert(&sample_event("1", now)).unwrap();
        s.upsert(&sample_event("2", now + Duration::days(10))).unwrap();

        let window = s.in_window(Some(Category::Conflict), now, now + Duration::days(1)).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].source_event_id, "1");
    }

    #[test]
    fn p1_count_respects_window() {
        let s = store_with_schema();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        s.upsert(&sample_event("1", now)).unwrap();
        assert_eq!(s.count_p1_in_window(now, now + Duration::days(1)).unwrap(), 1);
        assert_eq!(s.count_p1_in_window(now + Duration::days(2), now + Duration::days(3)).unwrap(), 0);
    }

    fn store_with_schema() -> SqliteEventStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events (
                id TEXT PRIMARY KEY, source TEXT NOT NULL, source_event_id TEXT NOT NULL,
                category TEXT NOT NULL, event_timestamp TEXT NOT NULL, ingested_at TEXT NOT NULL,
                country_code TEXT, priority TEXT, severity TEXT, risk_score REAL, payload_json TEXT NOT NULL
            );",
        )
        .unwrap();
        SqliteEventStore::new(Arc::new(Mutex::new(conn)))
    }
}
