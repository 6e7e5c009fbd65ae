//! Multi-step operations shared by the HTTP routes, the tool server and
//! the CLI: report generation for a stored event, and the
//! detect-estimate-log-report flow for a new image.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cleancity_core::error::{CleanCityError, Result};
use cleancity_core::estimator::Estimate;
use cleancity_core::location::{display_location, normalize_location};
use cleancity_core::types::{item_breakdown, Detection, Event, Hotspot, ReportFormat};
use cleancity_insight::Report;
use cleancity_storage::{NewEvent, PurgeResult, RetentionManager};

use crate::params::{
    AnalyzeOptions, EventQuery, EventsResponse, HotspotQuery, HotspotsResponse, PurgeRequest,
};
use crate::state::AppState;

/// Everything produced by one pass of [`analyze`].
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeOutcome {
    pub detections: Vec<Detection>,
    pub estimate: Estimate,
    /// The stored event, when logging was requested.
    pub event: Option<Event>,
    pub report: Report,
}

/// Run an event query and summarize everything it matches.
pub fn query_events(state: &AppState, query: EventQuery) -> Result<EventsResponse> {
    let filters = query.into_filters(Utc::now())?;
    let events = state.store.query_events(&filters)?;
    let summary = state.store.summary(&filters)?;
    Ok(EventsResponse {
        count: events.len(),
        events,
        summary,
    })
}

/// Hotspots with the configured defaults filled in.
pub fn hotspots(state: &AppState, query: HotspotQuery) -> Result<HotspotsResponse> {
    let defaults = state.hotspots.defaults();
    let window_days = query.window_days.unwrap_or(defaults.window_days);
    let min_events = query.min_events.unwrap_or(defaults.min_events);
    let hotspots = state
        .hotspots
        .get_hotspots(Some(window_days), Some(min_events))?;
    Ok(HotspotsResponse {
        hotspots,
        window_days,
        min_events,
    })
}

/// Purge old events. An explicit `days` wins over `storage.retention_days`.
pub fn purge(state: &AppState, req: PurgeRequest) -> Result<PurgeResult> {
    let now = Utc::now();
    match req.days {
        Some(days) => RetentionManager::purge_days(&state.store, days, now, req.dry_run),
        None => RetentionManager::run_purge(&state.store, &state.config.storage, now, req.dry_run)?
            .ok_or_else(|| {
                CleanCityError::validation("days", "required when storage.retention_days is 0")
            }),
    }
}

/// Estimate for a stored event, refined by its detection breakdown.
pub fn estimate_for_event(state: &AppState, event: &Event) -> Estimate {
    let breakdown = item_breakdown(&event.detections);
    state.estimator.estimate_count(event.item_count, Some(&breakdown))
}

/// The current hotspot covering the event's location, if any.
fn hotspot_for(state: &AppState, event: &Event) -> Result<Option<Hotspot>> {
    let hotspots = state.hotspots.get_hotspots(None, None)?;
    Ok(hotspots
        .into_iter()
        .find(|h| h.location == event.location_key))
}

/// Render a report for a stored event. Returns `None` when the event does
/// not exist.
pub async fn generate_report(
    state: &AppState,
    event_id: i64,
    format: ReportFormat,
    enhance: bool,
) -> Result<Option<Report>> {
    let Some(event) = state.store.get_event(event_id)? else {
        return Ok(None);
    };
    let report = render(state, &event, format, enhance).await?;
    Ok(Some(report))
}

async fn render(
    state: &AppState,
    event: &Event,
    format: ReportFormat,
    enhance: bool,
) -> Result<Report> {
    let estimate = estimate_for_event(state, event);
    let hotspot = hotspot_for(state, event)?;
    let mut report = state
        .formatter
        .render(format, event, &estimate, hotspot.as_ref());

    if enhance {
        let prompt = state.formatter.enhancement_prompt(event, &estimate);
        match state.enhancer.enhance(&prompt).await {
            Ok(Some(text)) => {
                report.body = text;
                report.enhanced = true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    provider = state.enhancer.name(),
                    error = %e,
                    "Report enhancement failed, using template"
                );
            }
        }
    }
    Ok(report)
}

/// Detect litter in `image`, estimate cleanup resources, optionally log the
/// event and render a report.
pub async fn analyze(state: &AppState, image: &[u8], options: AnalyzeOptions) -> Result<AnalyzeOutcome> {
    let format = options.report_format()?;
    let detections = state.vision.detect(image).await?;
    let item_count = detections.len() as u32;
    let breakdown = item_breakdown(&detections);
    let estimate = state.estimator.estimate_count(item_count, Some(&breakdown));

    let (event, logged) = if options.log {
        let event = state.store.log_event(NewEvent {
            location: options.location.clone(),
            item_count: i64::from(item_count),
            detections: detections.clone(),
            notes: options.notes.clone(),
        })?;
        (event, true)
    } else {
        // Unsaved events are rendered with id 0 and the current time.
        let event = Event {
            id: 0,
            location: display_location(options.location.as_deref()),
            location_key: normalize_location(options.location.as_deref()),
            timestamp: Utc::now(),
            item_count,
            severity: estimate.severity,
            detections: detections.clone(),
            notes: options.notes.clone(),
        };
        (event, false)
    };

    let report = render(state, &event, format, options.enhance).await?;
    info!(
        vision = state.vision.name(),
        item_count,
        severity = estimate.severity.as_str(),
        logged,
        "Image analyzed"
    );

    Ok(AnalyzeOutcome {
        detections,
        estimate,
        event: logged.then_some(event),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use cleancity_core::config::CleanCityConfig;
    use cleancity_providers::{ProviderError, ReportEnhancer, StaticVision};
    use cleancity_storage::Database;

    struct FailingEnhancer;

    #[async_trait]
    impl ReportEnhancer for FailingEnhancer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn enhance(&self, _prompt: &str) -> std::result::Result<Option<String>, ProviderError> {
            Err(ProviderError::RateLimit)
        }
    }

    struct EchoEnhancer;

    #[async_trait]
    impl ReportEnhancer for EchoEnhancer {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn enhance(&self, _prompt: &str) -> std::result::Result<Option<String>, ProviderError> {
            Ok(Some("Polished report".to_string()))
        }
    }

    fn det(label: &str) -> Detection {
        Detection {
            object_type: label.to_string(),
            confidence: 0.9,
            bounding_box: [0, 0, 4, 4],
        }
    }

    fn state_with(enhancer: Arc<dyn ReportEnhancer>, detections: Vec<Detection>) -> AppState {
        AppState::new(
            CleanCityConfig::default(),
            Database::in_memory().unwrap(),
            enhancer,
            Arc::new(StaticVision::new(detections)),
        )
    }

    #[test]
    fn test_purge_requires_days_when_retention_disabled() {
        let state = AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap());
        let err = purge(&state, PurgeRequest::default()).unwrap_err();
        assert_eq!(err.field(), Some("days"));
    }

    #[test]
    fn test_purge_dry_run_keeps_rows() {
        let state = AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap());
        let old = Utc::now() - chrono::Duration::days(40);
        state.store.log_event_at(NewEvent::new("Pier", 1), old).unwrap();
        state.store.log_event(NewEvent::new("Pier", 1)).unwrap();

        let req = PurgeRequest {
            days: Some(30),
            dry_run: true,
        };
        let result = purge(&state, req).unwrap();
        assert_eq!(result.records_deleted, 1);
        assert_eq!(state.store.count().unwrap(), 2);

        let result = purge(&state, PurgeRequest { days: Some(30), dry_run: false }).unwrap();
        assert_eq!(result.records_deleted, 1);
        assert_eq!(state.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generate_report_missing_event() {
        let state = AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap());
        let report = generate_report(&state, 99, ReportFormat::Email, false).await.unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_generate_report_includes_hotspot() {
        let state = AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap());
        state.store.log_event(NewEvent::new("Central Park", 3)).unwrap();
        let event = state.store.log_event(NewEvent::new("central park", 4)).unwrap();

        let report = generate_report(&state, event.id, ReportFormat::Markdown, false)
            .await
            .unwrap()
            .unwrap();
        assert!(report.body.contains("## Hotspot"));
        assert!(report.body.contains("reported 2 times"));
    }

    #[tokio::test]
    async fn test_enhancement_failure_falls_back_to_template() {
        let state = state_with(Arc::new(FailingEnhancer), Vec::new());
        let event = state.store.log_event(NewEvent::new("Pier", 5)).unwrap();

        let report = generate_report(&state, event.id, ReportFormat::Plain, true)
            .await
            .unwrap()
            .unwrap();
        assert!(!report.enhanced);
        assert!(report.body.contains("LITTER DETECTION REPORT"));
    }

    #[tokio::test]
    async fn test_enhancement_replaces_body() {
        let state = state_with(Arc::new(EchoEnhancer), Vec::new());
        let event = state.store.log_event(NewEvent::new("Pier", 5)).unwrap();

        let report = generate_report(&state, event.id, ReportFormat::Email, true)
            .await
            .unwrap()
            .unwrap();
        assert!(report.enhanced);
        assert_eq!(report.body, "Polished report");
    }

    #[tokio::test]
    async fn test_analyze_logs_event() {
        let detections = vec![det("can"), det("glass_bottle"), det("can")];
        let state = state_with(Arc::new(FailingEnhancer), detections);

        let outcome = analyze(
            &state,
            b"jpeg",
            AnalyzeOptions {
                location: Some("Harbor Walk".to_string()),
                ..AnalyzeOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.detections.len(), 3);
        assert_eq!(outcome.estimate.item_count, 3);
        assert!(outcome
            .estimate
            .equipment
            .contains(&"Safety goggles".to_string()));
        let event = outcome.event.unwrap();
        assert_eq!(event.location_key, "harbor walk");
        assert_eq!(outcome.report.event_id, event.id);
        assert_eq!(state.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_analyze_without_logging() {
        let state = state_with(Arc::new(FailingEnhancer), vec![det("can")]);
        let outcome = analyze(
            &state,
            b"jpeg",
            AnalyzeOptions {
                log: false,
                format: Some("plain".to_string()),
                ..AnalyzeOptions::default()
            },
        )
        .await
        .unwrap();

        assert!(outcome.event.is_none());
        assert_eq!(outcome.report.event_id, 0);
        assert!(outcome.report.body.contains("Location: unknown"));
        assert_eq!(state.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_analyze_offline_vision_stores_nothing() {
        let state = AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap());
        let err = analyze(&state, b"\xFF\xD8jpegbytes", AnalyzeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "provider_error");
        assert_eq!(state.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_format_before_detection() {
        let state = state_with(Arc::new(FailingEnhancer), vec![det("can")]);
        let err = analyze(
            &state,
            b"jpeg",
            AnalyzeOptions {
                format: Some("pdf".to_string()),
                ..AnalyzeOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.field(), Some("format"));
        assert_eq!(state.store.count().unwrap(), 0);
    }
}
