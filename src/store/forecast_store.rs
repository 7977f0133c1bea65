//! Forecast persistence (C17's upstream, read by the graph/narrative
//! read-model): one row per `(entity_id, horizon)`, overwritten on each
//! regeneration rather than versioned, since only the latest forecast is
//! ever served and staleness is checked against `generated_at`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{PipelineError, PipelineResult};
use crate::event::ForecastResult;

pub trait ForecastStore: Send + Sync {
    fn put(&self, result: &ForecastResult) -> PipelineResult<()>;

    fn get(&self, entity_id: &str, horizon: &str) -> PipelineResult<Option<ForecastResult>>;

    fn for_entity(&self, entity_id: &str) -> PipelineResult<Vec<ForecastResult>>;
}

pub struct SqliteForecastStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteForecastStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_forecast(row: &rusqlite::Row) -> rusqlite::Result<ForecastResult> {
        let payload_json: String = row.get("payload_json")?;
        serde_json::from_str(&payload_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
    }
}

impl ForecastStore for SqliteForecastStore {
    fn put(&self, result: &ForecastResult) -> PipelineResult<()> {
        let payload_json = serde_json::to_string(result)
            .map_err(|e| PipelineError::bad_input(format!("forecast not serializable: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO forecasts (entity_id, horizon, payload_json, generated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id, horizon) DO UPDATE SET
                payload_json = excluded.payload_json,
                generated_at = excluded.generated_at",
            params![result.entity_id, result.horizon, payload_json, result.generated_at.to_rfc3339()],
        )
        .map_err(|e| PipelineError::transient(format!("forecast upsert failed: {e}")))?;
        Ok(())
    }

    fn get(&self, entity_id: &str, horizon: &str) -> PipelineResult<Option<ForecastResult>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT payload_json, entity_id, horizon, generated_at FROM forecasts WHERE entity_id = ?1 AND horizon = ?2",
            params![entity_id, horizon],
            Self::row_to_forecast,
        )
        .optional()
        .map_err(|e| PipelineError::transient(format!("forecast lookup failed: {e}")))
    }

    fn for_entity(&self, entity_id: &str) -> PipelineResult<Vec<ForecastResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT payload_json, entity_id, horizon, generated_at FROM forecasts WHERE entity_id = ?1")
            .map_err(|e| PipelineError::transient(format!("prepare failed: {e}")))?;
        let forecasts = stmt
            .query_map(params![entity_id], Self::row_to_forecast)
            .map_err(|e| PipelineError::transient(format!("query failed: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(forecasts)
    }
}
