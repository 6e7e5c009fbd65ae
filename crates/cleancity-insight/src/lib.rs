//! CleanCity insight crate: hotspot analysis and report rendering.

pub mod hotspot;
pub mod report;

pub use hotspot::{compute_hotspots, HotspotAnalyzer};
pub use report::{Report, ReportFormatter};
