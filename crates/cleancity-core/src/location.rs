//! Location text handling shared by logging, filtering and hotspot grouping.

/// Sentinel stored when a caller gives no usable location.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Display form: trimmed text, or [`UNKNOWN_LOCATION`] when blank or absent.
pub fn display_location(location: Option<&str>) -> String {
    match location.map(str::trim) {
        Some(loc) if !loc.is_empty() => loc.to_string(),
        _ => UNKNOWN_LOCATION.to_string(),
    }
}

/// Grouping key: the display form, case-folded.
pub fn normalize_location(location: Option<&str>) -> String {
    display_location(location).to_lowercase()
}
