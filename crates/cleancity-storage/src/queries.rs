//! Event filters and the SQL they compile to.
//!
//! Every filter is optional; an empty [`EventFilters`] matches all events.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use serde::{Deserialize, Serialize};

use cleancity_core::error::{CleanCityError, Result};
use cleancity_core::types::Severity;

/// Restrictions applied by `query_events` and `summary`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilters {
    /// Case-insensitive substring of the normalized location.
    pub location: Option<String>,
    /// Inclusive lower bound on the event timestamp.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub end: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
    pub min_item_count: Option<i64>,
    /// Maximum number of events returned. Ignored by `summary`.
    pub limit: Option<u32>,
}

impl EventFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn min_item_count(mut self, min: i64) -> Self {
        self.min_item_count = Some(min);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject filter combinations that can never be satisfied sensibly.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(CleanCityError::validation(
                    "start",
                    format!("start ({}) is after end ({})", start, end),
                ));
            }
        }
        if let Some(min) = self.min_item_count {
            if min < 0 {
                return Err(CleanCityError::validation(
                    "min_item_count",
                    format!("must be >= 0, got {}", min),
                ));
            }
        }
        if self.limit == Some(0) {
            return Err(CleanCityError::validation("limit", "must be at least 1"));
        }
        Ok(())
    }

    /// Build the WHERE clause and its parameters.
    ///
    /// Returns an empty clause when no filter is set.
    pub(crate) fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<&'static str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref location) = self.location {
            let needle = location.trim().to_lowercase();
            if !needle.is_empty() {
                conditions.push("location_key LIKE ? ESCAPE '\\'");
                params.push(Box::new(format!("%{}%", escape_like(&needle))));
            }
        }
        if let Some(start) = self.start {
            conditions.push("timestamp >= ?");
            params.push(Box::new(start.timestamp_millis()));
        }
        if let Some(end) = self.end {
            conditions.push("timestamp <= ?");
            params.push(Box::new(end.timestamp_millis()));
        }
        if let Some(severity) = self.severity {
            conditions.push("severity = ?");
            params.push(Box::new(severity.as_str().to_string()));
        }
        if let Some(min) = self.min_item_count {
            conditions.push("item_count >= ?");
            params.push(Box::new(min));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

/// Aggregate figures over the events matching a filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub total_events: u64,
    pub total_items: u64,
    pub avg_items: f64,
    pub unique_locations: u64,
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_filters_have_no_clause() {
        let (clause, params) = EventFilters::new().where_clause();
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_blank_location_is_ignored() {
        let (clause, _) = EventFilters::new().location("   ").where_clause();
        assert!(clause.is_empty());
    }

    #[test]
    fn test_clause_combines_conditions() {
        let now = Utc::now();
        let filters = EventFilters::new()
            .location("Park")
            .between(now - Duration::days(1), now)
            .severity(Severity::High)
            .min_item_count(5);
        let (clause, params) = filters.where_clause();
        assert!(clause.starts_with(" WHERE "));
        assert_eq!(clause.matches(" AND ").count(), 4);
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like("100%_off\\"), "100\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let now = Utc::now();
        let err = EventFilters::new()
            .between(now, now - Duration::seconds(1))
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("start"));
    }

    #[test]
    fn test_validate_accepts_equal_bounds() {
        let now = Utc::now();
        assert!(EventFilters::new().between(now, now).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limit_and_negative_min() {
        assert_eq!(
            EventFilters::new().limit(0).validate().unwrap_err().field(),
            Some("limit")
        );
        assert_eq!(
            EventFilters::new().min_item_count(-3).validate().unwrap_err().field(),
            Some("min_item_count")
        );
    }

    #[test]
    fn test_filters_deserialize_from_json() {
        let json = r#"{"location": "park", "severity": "high", "limit": 10}"#;
        let filters: EventFilters = serde_json::from_str(json).unwrap();
        assert_eq!(filters.location.as_deref(), Some("park"));
        assert_eq!(filters.severity, Some(Severity::High));
        assert_eq!(filters.limit, Some(10));
        assert!(filters.start.is_none());
    }
}
