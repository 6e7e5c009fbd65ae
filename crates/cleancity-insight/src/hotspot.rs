//! Hotspot detection: locations with repeated litter reports.
//!
//! Grouping is a pure function of the events, the reference time and the
//! window so it can be exercised with a fixed clock; [`HotspotAnalyzer`]
//! only adds loading from the event store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use cleancity_core::config::HotspotConfig;
use cleancity_core::error::Result;
use cleancity_core::types::{Event, Hotspot, Severity, Trend};
use cleancity_storage::{EventFilters, EventStore};

/// Loads recent events and ranks recurring locations.
pub struct HotspotAnalyzer {
    store: Arc<EventStore>,
    defaults: HotspotConfig,
}

impl HotspotAnalyzer {
    pub fn new(store: Arc<EventStore>, defaults: HotspotConfig) -> Self {
        Self { store, defaults }
    }

    /// Configured window and threshold used when a caller omits them.
    pub fn defaults(&self) -> &HotspotConfig {
        &self.defaults
    }

    /// Hotspots in the trailing `window_days` relative to now.
    pub fn get_hotspots(
        &self,
        window_days: Option<i64>,
        min_events: Option<u32>,
    ) -> Result<Vec<Hotspot>> {
        self.get_hotspots_at(Utc::now(), window_days, min_events)
    }

    /// Hotspots in the trailing `window_days` relative to `now`.
    pub fn get_hotspots_at(
        &self,
        now: DateTime<Utc>,
        window_days: Option<i64>,
        min_events: Option<u32>,
    ) -> Result<Vec<Hotspot>> {
        let window_days = window_days.unwrap_or(self.defaults.window_days);
        let min_events = min_events.unwrap_or(self.defaults.min_events);
        if window_days <= 0 {
            return Ok(Vec::new());
        }

        let cutoff = window_start(now, window_days);
        let events = self.store.query_events(&EventFilters {
            start: Some(cutoff),
            ..EventFilters::default()
        })?;

        let hotspots = compute_hotspots(&events, now, window_days, min_events);
        debug!(
            window_days,
            min_events,
            scanned = events.len(),
            found = hotspots.len(),
            "Hotspots computed"
        );
        Ok(hotspots)
    }
}

/// Start of the trailing window. A window reaching past the earliest
/// representable time covers every event.
fn window_start(now: DateTime<Utc>, window_days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(window_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Group `events` inside `[now - window_days, ...)` by location key and keep
/// groups with at least `min_events` members.
///
/// Sorted by event count descending, then location ascending. A non-positive
/// window yields nothing.
pub fn compute_hotspots(
    events: &[Event],
    now: DateTime<Utc>,
    window_days: i64,
    min_events: u32,
) -> Vec<Hotspot> {
    if window_days <= 0 {
        return Vec::new();
    }
    let start = window_start(now, window_days);
    let midpoint = start + (now - start) / 2;

    let mut groups: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events.iter().filter(|e| e.timestamp >= start) {
        groups.entry(event.location_key.as_str()).or_default().push(event);
    }

    let mut hotspots: Vec<Hotspot> = groups
        .into_iter()
        .filter(|(_, group)| group.len() as u64 >= u64::from(min_events))
        .filter_map(|(location, group)| summarize(location, &group, midpoint, window_days))
        .collect();

    hotspots.sort_by(|a, b| {
        b.event_count
            .cmp(&a.event_count)
            .then_with(|| a.location.cmp(&b.location))
    });
    hotspots
}

fn summarize(
    location: &str,
    group: &[&Event],
    midpoint: DateTime<Utc>,
    window_days: i64,
) -> Option<Hotspot> {
    let last_seen = group.iter().map(|e| e.timestamp).max()?;
    let event_count = group.len() as u32;
    let total_items: u64 = group.iter().map(|e| u64::from(e.item_count)).sum();

    let recent = group.iter().filter(|e| e.timestamp >= midpoint).count();
    let earlier = group.len() - recent;

    Some(Hotspot {
        location: location.to_string(),
        event_count,
        window_days,
        avg_severity: modal_severity(group),
        trend: trend(earlier, recent),
        total_items,
        avg_items: total_items as f64 / f64::from(event_count),
        last_seen,
    })
}

/// Most frequent severity; ties resolve to the higher label.
fn modal_severity(group: &[&Event]) -> Severity {
    let mut counts = [0usize; 3];
    for event in group {
        counts[event.severity as usize] += 1;
    }
    let mut best = Severity::Low;
    for severity in Severity::ALL {
        if counts[severity as usize] >= counts[best as usize] {
            best = severity;
        }
    }
    best
}

fn trend(earlier: usize, recent: usize) -> Trend {
    match recent.cmp(&earlier) {
        std::cmp::Ordering::Greater => Trend::Worsening,
        std::cmp::Ordering::Less => Trend::Improving,
        std::cmp::Ordering::Equal => Trend::Stable,
    }
}
