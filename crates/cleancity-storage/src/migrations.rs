//! Database schema migrations.
//!
//! Applies the events schema and records applied versions in
//! `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use cleancity_core::error::CleanCityError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), CleanCityError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CleanCityError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CleanCityError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: events");
    }

    Ok(())
}

/// Version 1: events table.
///
/// `timestamp` is epoch milliseconds (UTC). AUTOINCREMENT keeps ids strictly
/// increasing even after the newest row is deleted.
fn apply_v1(conn: &Connection) -> Result<(), CleanCityError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       INTEGER NOT NULL,
            location        TEXT NOT NULL,
            location_key    TEXT NOT NULL,
            item_count      INTEGER NOT NULL CHECK (item_count >= 0),
            severity        TEXT NOT NULL
                            CHECK (severity IN ('low', 'medium', 'high')),
            detections_json TEXT NOT NULL DEFAULT '[]',
            notes           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_timestamp
            ON events (timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_events_location_key
            ON events (location_key, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_events_severity
            ON events (severity, timestamp DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'events');
        ",
    )
    .map_err(|e| CleanCityError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
