//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS log_events (
            id TEXT PRIMARY KEY,
            timestamp_ms INTEGER NOT NULL,
            service TEXT NOT NULL,
            level TEXT NOT NULL,
            level_rank INTEGER NOT NULL,
            message TEXT NOT NULL,
            error_type TEXT,
            trace_id TEXT,
            span_id TEXT,
            attributes_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_log_events_ts ON log_events(timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_log_events_service_ts ON log_events(service, timestamp_ms);
        CREATE INDEX IF NOT EXISTS idx_log_events_trace ON log_events(trace_id);

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            signature_json TEXT NOT NULL,
            services_json TEXT NOT NULL,
            resolution TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at);",
    )?;

    // Migration: record the report an incident was saved from
    let has_report: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('incidents') WHERE name='report_id'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_report == 0 {
        conn.execute("ALTER TABLE incidents ADD COLUMN report_id TEXT", [])?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        [],
    )?;

    Ok(())
}
