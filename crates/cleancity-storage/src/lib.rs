//! CleanCity storage crate: SQLite persistence for litter events.
//!
//! Provides a WAL-mode SQLite database with migrations, the append-only
//! event store, query filters and summaries, and the retention purge.

pub mod db;
pub mod migrations;
pub mod queries;
pub mod repository;
pub mod retention;

pub use db::Database;
pub use queries::{EventFilters, EventSummary};
pub use repository::{EventStore, NewEvent};
pub use retention::{PurgeResult, RetentionManager};
