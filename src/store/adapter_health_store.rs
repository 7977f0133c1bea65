//! Adapter health persistence: extends C4's in-memory health map (§4.1) so
//! it survives a process restart instead of resetting every adapter to
//! "never run" on every deploy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::adapters::AdapterHealth;
use crate::error::{PipelineError, PipelineResult};

pub trait AdapterHealthStore: Send + Sync {
    fn put(&self, source_name: &str, health: &AdapterHealth) -> PipelineResult<()>;

    fn load_all(&self) -> PipelineResult<HashMap<String, AdapterHealth>>;
}

pub struct SqliteAdapterHealthStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAdapterHealthStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc))
}

impl AdapterHealthStore for SqliteAdapterHealthStore {
    fn put(&self, source_name: &str, health: &AdapterHealth) -> PipelineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO adapter_health
             (source_name, last_run, last_success, total_runs, success_rate, last_events_count, last_duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_name) DO UPDATE SET
                last_run = excluded.last_run,
                last_success = excluded.last_success,
                total_runs = excluded.total_runs,
                success_rate = excluded.success_rate,
                last_events_count = excluded.last_events_count,
                last_duration_ms = excluded.last_duration_ms",
            params![
                source_name,
                health.last_run.map(|t| t.to_rfc3339()),
                health.last_success.map(|t| t.to_rfc3339()),
                health.total_runs as i64,
                health.success_rate,
                health.last_events_count as i64,
                health.last_duration_ms as i64,
            ],
        )
        .map_err(|e| PipelineError::transient(format!("adapter health upsert failed: {e}")))?;
        Ok(())
    }

    fn load_all(&self) -> PipelineResult<HashMap<String, AdapterHealth>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_name, last_run, last_success, total_runs, success_rate, last_events_count, last_duration_ms
                 FROM adapter_health",
            )
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let rows = stmt
            .query_map(params![], |row| {
                let source_name: String = row.get("source_name")?;
                let last_run: Option<String> = row.get("last_run")?;
                let last_success: Option<String> = row.get("last_success")?;
                let total_runs: i64 = row.get("total_runs")?;
                let success_rate: f64 = row.get("success_rate")?;
                let last_events_count: i64 = row.get("last_events_count")?;
                let last_duration_ms: i64 = row.get("last_duration_ms")?;
                Ok((
                    source_name,
                    AdapterHealth {
                        last_run: parse_ts(last_run),
                        last_success: parse_ts(last_success),
                        total_runs: total_runs.max(0) as u64,
                        success_rate,
                        last_events_count: last_events_count.max(0) as u32,
                        last_duration_ms: last_duration_ms.max(0) as u64,
                    },
                ))
            })
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_schema() -> SqliteAdapterHealthStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE adapter_health (
                source_name TEXT PRIMARY KEY, last_run TEXT, last_success TEXT,
                total_runs INTEGER NOT NULL, success_rate REAL NOT NULL,
                last_events_count INTEGER NOT NULL, last_duration_ms INTEGER NOT NULL
            );",
        )
        .unwrap();
        SqliteAdapterHealthStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn put_then_load_all_roundtrips() {
        let s = store_with_schema();
        let now = Utc::now();
        let health = AdapterHealth {
            last_run: Some(now),
            last_success: Some(now),
            total_runs: 5,
            success_rate: 0.8,
            last_events_count: 12,
            last_duration_ms: 340,
        };
        s.put("gdelt", &health).unwrap();
        let all = s.load_all().unwrap();
        let loaded = all.get("gdelt").unwrap();
        assert_eq!(loaded.total_runs, 5);
        assert!((loaded.success_rate - 0.8).abs() < 1e-9);
    }

    #[test]
    fn put_overwrites_existing_row() {
        let s = store_with_schema();
        let now = Utc::now();
        s.put(
            "gdelt",
            &AdapterHealth { last_run: Some(now), last_success: None, total_runs: 1, success_rate: 0.0, last_events_count: 0, last_duration_ms: 10 },
        )
        .unwrap();
        s.put(
            "gdelt",
            &AdapterHealth { last_run: Some(now), last_success: Some(now), total_runs: 2, success_rate: 0.5, last_events_count: 3, last_duration_ms: 20 },
        )
        .unwrap();
        let all = s.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["gdelt"].total_runs, 2);
    }
}
