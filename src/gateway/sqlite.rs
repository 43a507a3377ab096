use super::{GatewayError, LogEvent, LogFilter, LogLevel, LogQueryGateway};
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Log store backed by the local `log_events` table.
///
/// Timestamps are stored as epoch milliseconds. Text matching folds ASCII case
/// only, which is what SQLite's `lower()` does.
#[derive(Clone)]
pub struct SqliteLogStore {
    pool: Pool,
}

impl SqliteLogStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Bulk insert, replacing events whose id already exists.
    pub fn insert_events(&self, events: &[LogEvent]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO log_events
                 (id, timestamp_ms, service, level, level_rank, message, error_type, trace_id, span_id, attributes_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for e in events {
                let attributes = serde_json::to_string(&e.attributes)?;
                stmt.execute(params![
                    e.id,
                    e.timestamp.timestamp_millis(),
                    e.service,
                    e.level.to_string(),
                    e.level.rank(),
                    e.message,
                    e.error_type,
                    e.trace_id,
                    e.span_id,
                    attributes,
                ])
                .with_context(|| format!("failed to insert event {}", e.id))?;
            }
        }
        tx.commit()?;
        info!(count = events.len(), "inserted log events");
        Ok(events.len())
    }

    fn select(pool: &Pool, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
        let conn = pool
            .get()
            .map_err(|e| GatewayError::Connectivity(e.to_string()))?;

        let mut sql = String::from(
            "SELECT id, timestamp_ms, service, level, message, error_type, trace_id, span_id, attributes_json
             FROM log_events WHERE timestamp_ms >= ? AND timestamp_ms <= ?",
        );
        let mut args: Vec<Value> = vec![
            Value::Integer(filter.start.timestamp_millis()),
            Value::Integer(filter.end.timestamp_millis()),
        ];
        if let Some(service) = &filter.service {
            sql.push_str(" AND service = ?");
            args.push(Value::Text(service.clone()));
        }
        if let Some(level) = filter.level {
            sql.push_str(" AND level_rank >= ?");
            args.push(Value::Integer(level.rank()));
        }
        if let Some(trace_id) = &filter.trace_id {
            sql.push_str(" AND trace_id = ?");
            args.push(Value::Text(trace_id.clone()));
        }
        if let Some(text) = &filter.text {
            sql.push_str(
                " AND (instr(lower(message), lower(?)) > 0 OR instr(lower(coalesce(error_type, '')), lower(?)) > 0)",
            );
            args.push(Value::Text(text.clone()));
            args.push(Value::Text(text.clone()));
        }
        sql.push_str(" ORDER BY timestamp_ms ASC, id ASC LIMIT ?");
        args.push(Value::Integer(limit.min(i64::MAX as usize) as i64));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    timestamp_ms: row.get(1)?,
                    service: row.get(2)?,
                    level: row.get(3)?,
                    message: row.get(4)?,
                    error_type: row.get(5)?,
                    trace_id: row.get(6)?,
                    span_id: row.get(7)?,
                    attributes_json: row.get(8)?,
                })
            })
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let mut events = Vec::new();
        for r in rows {
            let raw = r.map_err(|e| GatewayError::Malformed(e.to_string()))?;
            events.push(raw.into_event()?);
        }
        Ok(events)
    }
}

struct RawRow {
    id: String,
    timestamp_ms: i64,
    service: String,
    level: String,
    message: String,
    error_type: Option<String>,
    trace_id: Option<String>,
    span_id: Option<String>,
    attributes_json: String,
}

impl RawRow {
    fn into_event(self) -> Result<LogEvent, GatewayError> {
        let timestamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .ok_or_else(|| GatewayError::Malformed(format!("bad timestamp on {}", self.id)))?;
        let level: LogLevel = self
            .level
            .parse()
            .map_err(|e: super::ParseLevelError| GatewayError::Malformed(e.to_string()))?;
        let attributes: BTreeMap<String, String> = serde_json::from_str(&self.attributes_json)
            .map_err(|e| GatewayError::Malformed(format!("attributes on {}: {}", self.id, e)))?;
        Ok(LogEvent {
            id: self.id,
            timestamp,
            service: self.service,
            level,
            message: self.message,
            error_type: self.error_type,
            trace_id: self.trace_id,
            span_id: self.span_id,
            attributes,
        })
    }
}

#[async_trait::async_trait]
impl LogQueryGateway for SqliteLogStore {
    async fn query(&self, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
        let pool = self.pool.clone();
        let filter = filter.clone();
        let events = tokio::task::spawn_blocking(move || Self::select(&pool, &filter, limit))
            .await
            .map_err(|e| GatewayError::Connectivity(format!("query task failed: {e}")))??;
        debug!(returned = events.len(), "sqlite query");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
