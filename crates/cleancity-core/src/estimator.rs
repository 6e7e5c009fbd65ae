//! Severity and cleanup-resource estimation.
//!
//! A pure mapping from an item count (plus an optional per-type breakdown)
//! to a severity tier and the resources a volunteer cleanup would need. The
//! event store and the reporting path share one [`Estimator`], so the same
//! count always yields the same estimate.

use serde::{Deserialize, Serialize};

use crate::config::EstimatorConfig;
use crate::error::{CleanCityError, Result};
use crate::types::{ItemBreakdown, Severity};

/// Highest count still classified as [`Severity::Low`].
pub const LOW_MAX_ITEMS: u32 = 10;
/// Highest count still classified as [`Severity::Medium`].
pub const MEDIUM_MAX_ITEMS: u32 = 50;
/// Items one volunteer is expected to handle.
pub const ITEMS_PER_VOLUNTEER: u32 = 10;
/// Above this count a wheeled bin is added to the kit.
pub const BIN_THRESHOLD_ITEMS: u32 = 10;

const BASE_EQUIPMENT: [&str; 3] = ["Heavy-duty trash bags", "Gloves", "Grabber tools"];

/// Resources recommended for one cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub item_count: u32,
    pub severity: Severity,
    pub volunteers: u32,
    pub minutes: u32,
    /// `hourly_rate × volunteers × hours`, rounded to cents.
    pub cost: f64,
    pub equipment: Vec<String>,
    /// Recommended action window.
    pub urgency_days: u32,
    pub environmental_impact: String,
    /// Markdown plan: priority, resources and next steps.
    pub action_summary: String,
}

/// Map an item count to its severity tier.
///
/// `<= 10` is low, `11..=50` is medium, `> 50` is high.
pub fn severity_for(item_count: u32) -> Severity {
    if item_count <= LOW_MAX_ITEMS {
        Severity::Low
    } else if item_count <= MEDIUM_MAX_ITEMS {
        Severity::Medium
    } else {
        Severity::High
    }
}

/// Reject negative counts coming from untyped callers.
pub fn validate_item_count(item_count: i64) -> Result<u32> {
    if item_count < 0 {
        return Err(CleanCityError::validation(
            "item_count",
            format!("must be >= 0, got {}", item_count),
        ));
    }
    u32::try_from(item_count).map_err(|_| {
        CleanCityError::validation("item_count", format!("{} is too large", item_count))
    })
}

/// Deterministic severity and resource estimator.
#[derive(Debug, Clone)]
pub struct Estimator {
    config: EstimatorConfig,
}

impl Estimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimate resources for `item_count` items.
    ///
    /// `item_types` only refines the equipment list; severity depends on the
    /// count alone.
    pub fn estimate(&self, item_count: i64, item_types: Option<&ItemBreakdown>) -> Result<Estimate> {
        let count = validate_item_count(item_count)?;
        Ok(self.estimate_count(count, item_types))
    }

    /// Infallible variant for counts that are already known to be valid.
    pub fn estimate_count(&self, count: u32, item_types: Option<&ItemBreakdown>) -> Estimate {
        let severity = severity_for(count);
        let volunteers = count.div_ceil(ITEMS_PER_VOLUNTEER).max(1);
        let minutes = match severity {
            Severity::Low => 20 + count.saturating_mul(2),
            Severity::Medium => 45 + count.saturating_mul(2),
            Severity::High => 90u32.saturating_add(count.saturating_mul(3)),
        };
        let urgency_days = match severity {
            Severity::Low => 7,
            Severity::Medium => 3,
            Severity::High => 1,
        };

        let hours = f64::from(minutes) / 60.0;
        let cost = round_cents(self.config.hourly_rate * f64::from(volunteers) * hours);
        let equipment = equipment_for(count, item_types);
        let action_summary =
            action_summary(severity, count, volunteers, minutes, &equipment, item_types);

        Estimate {
            item_count: count,
            severity,
            volunteers,
            minutes,
            cost,
            equipment,
            urgency_days,
            environmental_impact: impact_text(severity).to_string(),
            action_summary,
        }
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

fn equipment_for(count: u32, item_types: Option<&ItemBreakdown>) -> Vec<String> {
    let mut equipment: Vec<String> = BASE_EQUIPMENT.iter().map(|s| s.to_string()).collect();

    let has_glass = item_types
        .map(|types| {
            types
                .iter()
                .any(|(t, n)| *n > 0 && t.to_ascii_lowercase().contains("glass"))
        })
        .unwrap_or(false);
    if has_glass {
        equipment.push("Safety goggles".to_string());
        equipment.push("Puncture-resistant bags".to_string());
    }

    if count > BIN_THRESHOLD_ITEMS {
        equipment.push("Wheeled collection bin".to_string());
    }
    equipment
}

/// Categories shown by name before the rest are summarized as a count.
const SUMMARY_CATEGORIES: usize = 3;

const NEXT_STEPS: [&str; 5] = [
    "Gather volunteers and equipment",
    "Coordinate cleanup date/time",
    "Execute cleanup operation",
    "Dispose of collected waste properly",
    "Document completion for tracking",
];

fn action_summary(
    severity: Severity,
    count: u32,
    volunteers: u32,
    minutes: u32,
    equipment: &[String],
    item_types: Option<&ItemBreakdown>,
) -> String {
    let categories: Vec<&str> = item_types
        .map(|types| {
            types
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(t, _)| t.as_str())
                .collect()
        })
        .unwrap_or_default();

    let mut detected = format!("Detected {} trash items", count);
    if !categories.is_empty() {
        let shown = categories
            .iter()
            .take(SUMMARY_CATEGORIES)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        detected.push_str(&format!(" including {}", shown));
        if categories.len() > SUMMARY_CATEGORIES {
            detected.push_str(&format!(
                " and {} other types",
                categories.len() - SUMMARY_CATEGORIES
            ));
        }
    }

    let mut out = format!(
        "**Cleanup Plan - {} Priority**\n\n{}.\n\n**Recommended Resources:**\n",
        severity.as_str().to_uppercase(),
        detected
    );
    out.push_str(&format!("- {} volunteer(s)\n", volunteers));
    out.push_str(&format!("- Approximately {} minutes\n", minutes));
    out.push_str(&format!("- {}\n", equipment.join(", ")));
    out.push_str("\n**Next Steps:**\n");
    for (i, step) in NEXT_STEPS.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }
    out
}

fn impact_text(severity: Severity) -> &'static str {
    match severity {
        Severity::High => {
            "Significant environmental concern. Risk of wildlife harm, water contamination, \
             and community health issues. Immediate action recommended."
        }
        Severity::Medium => {
            "Moderate environmental impact. Potential for wildlife interaction and visual \
             pollution. Timely cleanup will prevent escalation."
        }
        Severity::Low => {
            "Minor environmental impact. Early intervention will maintain area cleanliness \
             and prevent accumulation."
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
