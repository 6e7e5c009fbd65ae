//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a mutex with a bounded lock wait.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{info, warn};

use cleancity_core::config::StorageConfig;
use cleancity_core::error::CleanCityError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Every statement runs while holding the connection mutex, which serializes
/// writers. Lock acquisition gives up after `lock_timeout` so a stuck caller
/// surfaces as a storage error instead of hanging the process.
pub struct Database {
    conn: Mutex<Connection>,
    lock_timeout: Duration,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, the busy timeout, and runs
    /// all pending migrations.
    pub fn new(path: &Path, config: &StorageConfig) -> Result<Self, CleanCityError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| CleanCityError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| CleanCityError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::finish(conn, config)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, CleanCityError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CleanCityError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CleanCityError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::finish(conn, &StorageConfig::default())
    }

    fn finish(conn: Connection, config: &StorageConfig) -> Result<Self, CleanCityError> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| CleanCityError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        };

        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure. Fails with a
    /// storage error if the lock is not acquired within the lock timeout.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CleanCityError>
    where
        F: FnOnce(&Connection) -> Result<T, CleanCityError>,
    {
        let conn = self.conn.try_lock_for(self.lock_timeout).ok_or_else(|| {
            warn!(timeout_ms = self.lock_timeout.as_millis() as u64, "Database lock timed out");
            CleanCityError::Storage(format!(
                "Timed out after {} ms waiting for the database lock",
                self.lock_timeout.as_millis()
            ))
        })?;
        f(&conn)
    }

    /// Flush the WAL and release the connection.
    pub fn close(self) -> Result<(), CleanCityError> {
        let conn = self.conn.into_inner();
        conn.close()
            .map_err(|(_, e)| CleanCityError::Storage(format!("Failed to close database: {}", e)))?;
        info!("Database closed");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn count_events(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .map_err(|e| CleanCityError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_events(&db), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path, &StorageConfig::default()).unwrap();

        assert_eq!(count_events(&db), 0);
        assert!(path.exists());
        db.close().unwrap();
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db"), &StorageConfig::default()).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| CleanCityError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_lock_timeout_returns_storage_error() {
        let config = StorageConfig {
            lock_timeout_ms: 20,
            ..StorageConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("lock.db"), &config).unwrap());

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                db.with_conn(|_| {
                    held_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
            })
        };

        held_rx.recv().unwrap();
        let err = db.with_conn(|_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), "storage_error");
        assert!(err.to_string().contains("Timed out"));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(db.with_conn(|_| Ok(())).is_ok());
    }
}
