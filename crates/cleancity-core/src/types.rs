use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CleanCityError;

// =============================================================================
// Enums
// =============================================================================

/// Litter severity tier derived from the item count.
///
/// Variant order is the severity order, so `Ord` compares by seriousness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Parse a stored or user-supplied label. Surrounding whitespace and case
    /// are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CleanCityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::parse(s).ok_or_else(|| {
            CleanCityError::validation(
                "severity",
                format!("'{}' is not one of: low, medium, high", s),
            )
        })
    }
}

/// Direction of a hotspot over its window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// More events in the recent half of the window.
    Worsening,
    /// Fewer events in the recent half of the window.
    Improving,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Worsening => "worsening",
            Trend::Improving => "improving",
            Trend::Stable => "stable",
        }
    }
}

/// Output template for the report formatter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Email,
    Markdown,
    Plain,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Email => "email",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Plain => "plain",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = CleanCityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ReportFormat::Email),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "plain" | "text" => Ok(ReportFormat::Plain),
            _ => Err(CleanCityError::validation(
                "format",
                format!("'{}' is not one of: email, markdown, plain", s),
            )),
        }
    }
}

// =============================================================================
// Structs
// =============================================================================

/// One object reported by the vision provider.
///
/// Stored opaquely with its event; only the number of detections and the
/// object types are interpreted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(alias = "label")]
    pub object_type: String,
    /// Confidence in `[0, 1]`.
    #[serde(alias = "score")]
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    #[serde(alias = "bbox")]
    pub bounding_box: [i32; 4],
}

/// Count of detections per object type, ordered by type name.
pub type ItemBreakdown = BTreeMap<String, u32>;

/// Tally detections by object type.
pub fn item_breakdown(detections: &[Detection]) -> ItemBreakdown {
    detections.iter().fold(BTreeMap::new(), |mut acc, d| {
        *acc.entry(d.object_type.clone()).or_insert(0) += 1;
        acc
    })
}

/// A persisted litter detection event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    /// Trimmed location text as submitted, or `"unknown"`.
    pub location: String,
    /// Case-folded grouping key derived from `location`.
    pub location_key: String,
    pub timestamp: DateTime<Utc>,
    pub item_count: u32,
    pub severity: Severity,
    pub detections: Vec<Detection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A recurring-problem location inside a trailing window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Normalized location key.
    pub location: String,
    pub event_count: u32,
    pub window_days: i64,
    /// Most frequent severity; ties go to the higher label.
    pub avg_severity: Severity,
    pub trend: Trend,
    pub total_items: u64,
    pub avg_items: f64,
    pub last_seen: DateTime<Utc>,
}
