//! Retention policy for old events.
//!
//! Events older than `storage.retention_days` are removed by an explicit
//! purge. A retention of 0 days keeps everything.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use cleancity_core::config::StorageConfig;
use cleancity_core::error::{CleanCityError, Result};

use crate::repository::EventStore;

/// Result of a purge run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeResult {
    /// Events strictly older than this were selected.
    pub cutoff: DateTime<Utc>,
    /// Events deleted, or that would be deleted on a dry run.
    pub records_deleted: usize,
    pub dry_run: bool,
}

/// Applies the configured retention window to an [`EventStore`].
pub struct RetentionManager;

impl RetentionManager {
    /// Cutoff for the configured retention, or `None` when retention is
    /// disabled or reaches past the earliest representable time.
    pub fn cutoff(config: &StorageConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if config.retention_days == 0 {
            return None;
        }
        days_before(now, config.retention_days)
    }

    /// Purge events older than `days` before `now`.
    pub fn purge_days(
        store: &EventStore,
        days: u32,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PurgeResult> {
        if days == 0 {
            return Err(CleanCityError::validation("days", "must be at least 1"));
        }
        let cutoff = days_before(now, days).ok_or_else(|| {
            CleanCityError::validation("days", format!("{} is out of range", days))
        })?;
        let records_deleted = if dry_run {
            store.count_older_than(cutoff)? as usize
        } else {
            store.purge_older_than(cutoff)?
        };

        info!(days, records_deleted, dry_run, "Retention purge complete");
        Ok(PurgeResult {
            cutoff,
            records_deleted,
            dry_run,
        })
    }

    /// Run a purge with the configured retention. Returns `None` when
    /// retention is disabled.
    pub fn run_purge(
        store: &EventStore,
        config: &StorageConfig,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Option<PurgeResult>> {
        if config.retention_days == 0 {
            info!("Retention disabled, nothing to purge");
            return Ok(None);
        }
        Self::purge_days(store, config.retention_days, now, dry_run).map(Some)
    }
}

fn days_before(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days)).and_then(|span| now.checked_sub_signed(span))
}
