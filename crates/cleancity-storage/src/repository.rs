//! SQLite-backed event store.
//!
//! Events are append-only: once logged, only deletion and retention purges
//! touch a row.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior};
use serde::Deserialize;
use tracing::{debug, info};

use cleancity_core::error::{CleanCityError, Result};
use cleancity_core::estimator::{validate_item_count, Estimator};
use cleancity_core::location::{display_location, normalize_location};
use cleancity_core::types::{Detection, Event, Severity};

use crate::db::Database;
use crate::queries::{EventFilters, EventSummary};

const EVENT_COLUMNS: &str =
    "id, timestamp, location, location_key, item_count, severity, detections_json, notes";

/// Input for [`EventStore::log_event`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewEvent {
    #[serde(default)]
    pub location: Option<String>,
    /// Signed so that negative counts reach validation instead of failing
    /// deserialization with a less useful message.
    pub item_count: i64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewEvent {
    pub fn new(location: impl Into<String>, item_count: i64) -> Self {
        Self {
            location: Some(location.into()),
            item_count,
            ..Self::default()
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Durable store of litter detection events.
pub struct EventStore {
    db: Arc<Database>,
    estimator: Arc<Estimator>,
}

impl EventStore {
    pub fn new(db: Arc<Database>, estimator: Arc<Estimator>) -> Self {
        Self { db, estimator }
    }

    /// Validate, classify and persist a new event stamped with the current
    /// time.
    ///
    /// The timestamp is taken while the writer transaction is held, so id
    /// order and timestamp order agree.
    pub fn log_event(&self, new: NewEvent) -> Result<Event> {
        self.insert(new, None)
    }

    /// Persist an event with an explicit timestamp (imports and backfills).
    pub fn log_event_at(&self, new: NewEvent, timestamp: DateTime<Utc>) -> Result<Event> {
        self.insert(new, Some(timestamp))
    }

    fn insert(&self, new: NewEvent, timestamp: Option<DateTime<Utc>>) -> Result<Event> {
        let item_count = validate_item_count(new.item_count)?;
        let severity = self.estimator.estimate_count(item_count, None).severity;
        let location = display_location(new.location.as_deref());
        let location_key = normalize_location(new.location.as_deref());
        let detections_json = serde_json::to_string(&new.detections)?;
        let notes = new
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let (id, timestamp) = self.db.with_conn(|conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                .map_err(|e| CleanCityError::Storage(format!("Failed to begin insert: {}", e)))?;

            let timestamp = truncate_to_millis(timestamp.unwrap_or_else(Utc::now));
            tx.execute(
                "INSERT INTO events (timestamp, location, location_key, item_count, severity, detections_json, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    timestamp.timestamp_millis(),
                    location,
                    location_key,
                    item_count,
                    severity.as_str(),
                    detections_json,
                    notes,
                ],
            )
            .map_err(|e| CleanCityError::Storage(format!("Failed to save event: {}", e)))?;
            let id = tx.last_insert_rowid();

            tx.commit()
                .map_err(|e| CleanCityError::Storage(format!("Failed to commit event: {}", e)))?;
            Ok((id, timestamp))
        })?;

        info!(
            id,
            location = %location_key,
            item_count,
            severity = severity.as_str(),
            "Event logged"
        );

        Ok(Event {
            id,
            location,
            location_key,
            timestamp,
            item_count,
            severity,
            detections: new.detections,
            notes,
        })
    }

    /// Events matching `filters`, newest first (id descending on ties).
    pub fn query_events(&self, filters: &EventFilters) -> Result<Vec<Event>> {
        filters.validate()?;
        let (clause, mut params) = filters.where_clause();

        let mut sql = format!(
            "SELECT {} FROM events{} ORDER BY timestamp DESC, id DESC",
            EVENT_COLUMNS, clause
        );
        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(i64::from(limit)));
        }

        let events = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt
                .query_map(param_refs.as_slice(), |row| Ok(row_to_event(row)))
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                let event = row.map_err(|e| CleanCityError::Storage(e.to_string()))??;
                events.push(event);
            }
            Ok(events)
        })?;

        debug!(count = events.len(), "Events queried");
        Ok(events)
    }

    /// Find a single event by id.
    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS))
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id], |row| Ok(row_to_event(row)))
                .optional()
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;

            match result {
                Some(event) => Ok(Some(event?)),
                None => Ok(None),
            }
        })
    }

    /// Remove an event. Returns `true` only when a row was deleted.
    pub fn delete_event(&self, id: i64) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM events WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| CleanCityError::Storage(format!("Failed to delete event: {}", e)))
        })?;
        if removed > 0 {
            info!(id, "Event deleted");
        }
        Ok(removed > 0)
    }

    /// Total number of stored events.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Aggregates over the events matching `filters`. `limit` is ignored.
    pub fn summary(&self, filters: &EventFilters) -> Result<EventSummary> {
        filters.validate()?;
        let (clause, params) = filters.where_clause();
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(item_count), 0), COUNT(DISTINCT location_key)
             FROM events{}",
            clause
        );

        self.db.with_conn(|conn| {
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let (total_events, total_items, unique_locations): (i64, i64, i64) = conn
                .query_row(&sql, param_refs.as_slice(), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;

            let avg_items = if total_events > 0 {
                total_items as f64 / total_events as f64
            } else {
                0.0
            };

            Ok(EventSummary {
                total_events: total_events as u64,
                total_items: total_items as u64,
                avg_items,
                unique_locations: unique_locations as u64,
            })
        })
    }

    /// Delete every event strictly older than `cutoff`. Returns the number
    /// of rows removed.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM events WHERE timestamp < ?1",
                rusqlite::params![cutoff.timestamp_millis()],
            )
            .map_err(|e| CleanCityError::Storage(format!("Failed to purge events: {}", e)))
        })?;
        info!(removed, cutoff = %cutoff, "Purged old events");
        Ok(removed)
    }

    /// Number of events strictly older than `cutoff`.
    pub fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM events WHERE timestamp < ?1",
                    rusqlite::params![cutoff.timestamp_millis()],
                    |row| row.get(0),
                )
                .map_err(|e| CleanCityError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<Event> {
    let id: i64 = row.get(0).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let timestamp_ms: i64 = row.get(1).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let location: String = row.get(2).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let location_key: String = row.get(3).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let item_count: i64 = row.get(4).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let severity_str: String = row.get(5).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let detections_json: String =
        row.get(6).map_err(|e| CleanCityError::Storage(e.to_string()))?;
    let notes: Option<String> = row.get(7).map_err(|e| CleanCityError::Storage(e.to_string()))?;

    let timestamp = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or_else(|| CleanCityError::Storage(format!("Invalid timestamp: {}", timestamp_ms)))?;

    let severity = Severity::parse(&severity_str)
        .ok_or_else(|| CleanCityError::Storage(format!("Invalid severity: {}", severity_str)))?;

    let detections: Vec<Detection> = serde_json::from_str(&detections_json).map_err(|e| {
        CleanCityError::Storage(format!("Corrupt detections for event {}: {}", id, e))
    })?;

    Ok(Event {
        id,
        location,
        location_key,
        timestamp,
        item_count: u32::try_from(item_count)
            .map_err(|_| CleanCityError::Storage(format!("Invalid item_count: {}", item_count)))?,
        severity,
        detections,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_store() -> EventStore {
        let db = Arc::new(Database::in_memory().unwrap());
        EventStore::new(db, Arc::new(Estimator::default()))
    }

    fn detection(object_type: &str) -> Detection {
        Detection {
            object_type: object_type.to_string(),
            confidence: 0.87,
            bounding_box: [10, 20, 110, 220],
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn test_log_event_round_trip() {
        let store = make_store();
        let new = NewEvent::new("  Central Park ", 12)
            .with_detections(vec![detection("plastic_bottle"), detection("can")])
            .with_notes("near the fountain");

        let logged = store.log_event(new).unwrap();
        assert_eq!(logged.location, "Central Park");
        assert_eq!(logged.location_key, "central park");
        assert_eq!(logged.severity, Severity::Medium);

        let found = store.get_event(logged.id).unwrap().unwrap();
        assert_eq!(found, logged);
        assert_eq!(found.detections.len(), 2);
        assert_eq!(found.detections[0].object_type, "plastic_bottle");
        assert_eq!(found.notes.as_deref(), Some("near the fountain"));
    }

    #[test]
    fn test_round_trip_through_query() {
        let store = make_store();
        let logged = store
            .log_event_at(
                NewEvent::new("Harbor Walk", 55)
                    .with_detections(vec![detection("glass_bottle"), detection("can")])
                    .with_notes("east pier"),
                ts(0),
            )
            .unwrap();

        let events = store.query_events(&EventFilters::default()).unwrap();
        assert_eq!(events, vec![logged.clone()]);
        let read = &events[0];
        assert_eq!(read.location, "Harbor Walk");
        assert_eq!(read.item_count, 55);
        assert_eq!(read.severity, Severity::High);
        assert_eq!(read.timestamp, ts(0));
        assert_eq!(read.detections, logged.detections);
        assert_eq!(read.detections[1].bounding_box, [10, 20, 110, 220]);
    }

    #[test]
    fn test_query_excludes_deleted_events() {
        let store = make_store();
        let ids: Vec<i64> = (0..5)
            .map(|i| {
                store
                    .log_event_at(NewEvent::new(format!("spot {}", i), i), ts(i))
                    .unwrap()
                    .id
            })
            .collect();

        assert!(store.delete_event(ids[2]).unwrap());
        let remaining: Vec<i64> = store
            .query_events(&EventFilters::default())
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(remaining, vec![ids[4], ids[3], ids[1], ids[0]]);
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(
            store.summary(&EventFilters::default()).unwrap().total_events,
            4
        );
    }

    #[test]
    fn test_missing_location_is_unknown() {
        let store = make_store();
        let event = store
            .log_event(NewEvent {
                location: None,
                item_count: 1,
                ..NewEvent::default()
            })
            .unwrap();
        assert_eq!(event.location, "unknown");
        assert_eq!(event.location_key, "unknown");
    }

    #[test]
    fn test_negative_count_rejected_without_write() {
        let store = make_store();
        let err = store.log_event(NewEvent::new("Pier 7", -1)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(err.field(), Some("item_count"));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_severity_boundaries_on_insert() {
        let store = make_store();
        let cases = [
            (0, Severity::Low),
            (10, Severity::Low),
            (11, Severity::Medium),
            (50, Severity::Medium),
            (51, Severity::High),
        ];
        for (count, expected) in cases {
            let event = store.log_event(NewEvent::new("x", count)).unwrap();
            assert_eq!(event.severity, expected, "count {}", count);
        }
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let store = make_store();
        let a = store.log_event(NewEvent::new("a", 1)).unwrap();
        let b = store.log_event(NewEvent::new("b", 1)).unwrap();
        assert!(b.id > a.id);

        // Deleting the newest row must not allow its id to be reused.
        assert!(store.delete_event(b.id).unwrap());
        let c = store.log_event(NewEvent::new("c", 1)).unwrap();
        assert!(c.id > b.id);
    }

    #[test]
    fn test_query_orders_newest_first() {
        let store = make_store();
        let old = store.log_event_at(NewEvent::new("a", 1), ts(0)).unwrap();
        let new = store.log_event_at(NewEvent::new("b", 1), ts(60)).unwrap();
        let mid = store.log_event_at(NewEvent::new("c", 1), ts(30)).unwrap();

        let ids: Vec<i64> = store
            .query_events(&EventFilters::new())
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![new.id, mid.id, old.id]);
    }

    #[test]
    fn test_query_breaks_timestamp_ties_by_id() {
        let store = make_store();
        let first = store.log_event_at(NewEvent::new("a", 1), ts(0)).unwrap();
        let second = store.log_event_at(NewEvent::new("a", 1), ts(0)).unwrap();

        let events = store.query_events(&EventFilters::new()).unwrap();
        assert_eq!(events[0].id, second.id);
        assert_eq!(events[1].id, first.id);
    }

    #[test]
    fn test_query_location_substring_case_insensitive() {
        let store = make_store();
        store.log_event(NewEvent::new("Central Park", 3)).unwrap();
        store.log_event(NewEvent::new("CENTRAL PARK east", 3)).unwrap();
        store.log_event(NewEvent::new("Harbor", 3)).unwrap();

        let events = store
            .query_events(&EventFilters::new().location("park"))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.location_key.contains("park")));
    }

    #[test]
    fn test_query_location_wildcards_are_literal() {
        let store = make_store();
        store.log_event(NewEvent::new("Lot_5", 1)).unwrap();
        store.log_event(NewEvent::new("Lot55", 1)).unwrap();

        let events = store
            .query_events(&EventFilters::new().location("lot_"))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].location, "Lot_5");
    }

    #[test]
    fn test_query_date_range_inclusive() {
        let store = make_store();
        let before = store.log_event_at(NewEvent::new("a", 1), ts(-1)).unwrap();
        let at_start = store.log_event_at(NewEvent::new("a", 1), ts(0)).unwrap();
        let at_end = store.log_event_at(NewEvent::new("a", 1), ts(100)).unwrap();
        let after = store.log_event_at(NewEvent::new("a", 1), ts(101)).unwrap();

        let ids: Vec<i64> = store
            .query_events(&EventFilters::new().between(ts(0), ts(100)))
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![at_end.id, at_start.id]);
        assert!(!ids.contains(&before.id));
        assert!(!ids.contains(&after.id));
    }

    #[test]
    fn test_query_severity_and_min_count() {
        let store = make_store();
        store.log_event(NewEvent::new("a", 5)).unwrap();
        store.log_event(NewEvent::new("b", 30)).unwrap();
        store.log_event(NewEvent::new("c", 80)).unwrap();

        let high = store
            .query_events(&EventFilters::new().severity(Severity::High))
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].item_count, 80);

        let at_least_30 = store
            .query_events(&EventFilters::new().min_item_count(30))
            .unwrap();
        assert_eq!(at_least_30.len(), 2);
    }

    #[test]
    fn test_query_limit() {
        let store = make_store();
        for i in 0..5 {
            store.log_event_at(NewEvent::new("a", 1), ts(i)).unwrap();
        }
        let events = store.query_events(&EventFilters::new().limit(2)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, ts(4));
    }

    #[test]
    fn test_query_no_match_is_empty() {
        let store = make_store();
        store.log_event(NewEvent::new("Harbor", 1)).unwrap();
        let events = store
            .query_events(&EventFilters::new().location("nowhere"))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_query_rejects_malformed_filters() {
        let store = make_store();
        let err = store
            .query_events(&EventFilters::new().between(ts(10), ts(0)))
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_delete_true_then_false() {
        let store = make_store();
        let event = store.log_event(NewEvent::new("a", 1)).unwrap();
        assert!(store.delete_event(event.id).unwrap());
        assert!(!store.delete_event(event.id).unwrap());
        assert!(store.get_event(event.id).unwrap().is_none());
        assert!(!store.delete_event(9_999).unwrap());
    }

    #[test]
    fn test_summary() {
        let store = make_store();
        store.log_event(NewEvent::new("Central Park", 4)).unwrap();
        store.log_event(NewEvent::new("central park", 6)).unwrap();
        store.log_event(NewEvent::new("Harbor", 20)).unwrap();

        let summary = store.summary(&EventFilters::new()).unwrap();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.total_items, 30);
        assert!((summary.avg_items - 10.0).abs() < 1e-9);
        assert_eq!(summary.unique_locations, 2);

        let empty = store
            .summary(&EventFilters::new().location("nowhere"))
            .unwrap();
        assert_eq!(empty, EventSummary::default());
    }

    #[test]
    fn test_purge_older_than() {
        let store = make_store();
        store.log_event_at(NewEvent::new("a", 1), ts(0)).unwrap();
        store.log_event_at(NewEvent::new("b", 1), ts(10)).unwrap();
        let kept = store.log_event_at(NewEvent::new("c", 1), ts(20)).unwrap();

        assert_eq!(store.count_older_than(ts(20)).unwrap(), 2);
        assert_eq!(store.purge_older_than(ts(20)).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get_event(kept.id).unwrap().is_some());
    }

    #[test]
    fn test_timestamp_truncated_to_millis() {
        let store = make_store();
        let precise = ts(0) + Duration::nanoseconds(1_234_567);
        let event = store.log_event_at(NewEvent::new("a", 1), precise).unwrap();
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 1_000_000);
        let found = store.get_event(event.id).unwrap().unwrap();
        assert_eq!(found.timestamp, event.timestamp);
    }

    #[test]
    fn test_new_event_rejects_unknown_fields() {
        let result: std::result::Result<NewEvent, _> =
            serde_json::from_str(r#"{"item_count": 3, "colour": "red"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(
            Database::new(
                &dir.path().join("events.db"),
                &cleancity_core::config::StorageConfig::default(),
            )
            .unwrap(),
        );
        let store = Arc::new(EventStore::new(db, Arc::new(Estimator::default())));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    for i in 0..10 {
                        let e = store
                            .log_event(NewEvent::new(format!("site {}", t), i))
                            .unwrap();
                        ids.push(e.id);
                    }
                    ids
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 80);
        assert_eq!(store.count().unwrap(), 80);
    }
}
