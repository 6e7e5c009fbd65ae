//! Request and response payloads shared by the HTTP routes and the tool
//! server.
//!
//! Field names are the public contract for both surfaces. Unknown fields
//! are rejected.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use cleancity_core::error::{CleanCityError, Result};
use cleancity_core::types::{Event, Hotspot, ItemBreakdown, ReportFormat, Severity};
use cleancity_storage::{EventFilters, EventSummary};

/// Result cap applied when a query names no limit.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

// =============================================================================
// Requests
// =============================================================================

/// Event query as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventQuery {
    pub location: Option<String>,
    pub severity: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Shorthand for `start = now - days`.
    pub days: Option<i64>,
    pub min_item_count: Option<i64>,
    pub limit: Option<u32>,
}

impl EventQuery {
    /// Resolve into store filters relative to `now`.
    pub fn into_filters(self, now: DateTime<Utc>) -> Result<EventFilters> {
        let severity = self
            .severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()?;

        let start = match (self.days, self.start) {
            (Some(_), Some(_)) => {
                return Err(CleanCityError::validation(
                    "days",
                    "cannot be combined with start",
                ))
            }
            (Some(days), None) if days <= 0 => {
                return Err(CleanCityError::validation(
                    "days",
                    format!("must be at least 1, got {}", days),
                ))
            }
            (Some(days), None) => Some(
                TimeDelta::try_days(days)
                    .and_then(|span| now.checked_sub_signed(span))
                    .ok_or_else(|| {
                        CleanCityError::validation("days", format!("{} is out of range", days))
                    })?,
            ),
            (None, start) => start,
        };

        let filters = EventFilters {
            location: self.location,
            start,
            end: self.end,
            severity,
            min_item_count: self.min_item_count,
            limit: Some(self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)),
        };
        filters.validate()?;
        Ok(filters)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HotspotQuery {
    pub window_days: Option<i64>,
    pub min_events: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimateRequest {
    pub item_count: i64,
    #[serde(default)]
    pub item_types: Option<ItemBreakdown>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub event_id: i64,
    #[serde(default)]
    pub format: Option<String>,
    /// Ask the configured enhancement provider to rewrite the report.
    #[serde(default)]
    pub enhance: bool,
}

impl ReportRequest {
    pub fn report_format(&self) -> Result<ReportFormat> {
        self.format
            .as_deref()
            .map(str::parse::<ReportFormat>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PurgeRequest {
    /// Age limit in days; falls back to `storage.retention_days`.
    pub days: Option<u32>,
    pub dry_run: bool,
}

/// Options for the detect-estimate-log-report workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzeOptions {
    pub location: Option<String>,
    pub notes: Option<String>,
    /// Persist the detection as an event.
    pub log: bool,
    pub format: Option<String>,
    pub enhance: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            location: None,
            notes: None,
            log: true,
            format: None,
            enhance: false,
        }
    }
}

impl AnalyzeOptions {
    pub fn report_format(&self) -> Result<ReportFormat> {
        self.format
            .as_deref()
            .map(str::parse::<ReportFormat>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
    pub count: usize,
    pub summary: EventSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HotspotsResponse {
    pub hotspots: Vec<Hotspot>,
    pub window_days: i64,
    pub min_events: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub id: i64,
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub total_events: u64,
}
