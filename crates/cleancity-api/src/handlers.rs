//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its parameters, calls the shared operations on
//! [`AppState`] and returns JSON. Extractor rejections are turned into
//! [`ApiError`] so every failure has the same body shape.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use cleancity_core::estimator::Estimate;
use cleancity_core::types::Event;
use cleancity_insight::Report;
use cleancity_storage::{EventSummary, NewEvent, PurgeResult};

use crate::error::ApiError;
use crate::params::{
    AnalyzeOptions, DeleteResponse, EstimateRequest, EventQuery, EventsResponse, HealthResponse,
    HotspotQuery, HotspotsResponse, PurgeRequest, ReportRequest,
};
use crate::state::AppState;
use crate::workflow::{self, AnalyzeOutcome};

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let total_events = state.store.count()?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_events,
    }))
}

// =============================================================================
// Events
// =============================================================================

/// POST /events - log a detection event.
pub async fn create_event(
    State(state): State<AppState>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let Json(new) = payload?;
    let event = state.store.log_event(new)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /events - filtered list, newest first.
pub async fn list_events(
    State(state): State<AppState>,
    query: Result<Query<EventQuery>, QueryRejection>,
) -> Result<Json<EventsResponse>, ApiError> {
    let Query(query) = query?;
    Ok(Json(workflow::query_events(&state, query)?))
}

/// GET /events/summary - aggregate statistics over the filtered events.
pub async fn events_summary(
    State(state): State<AppState>,
    query: Result<Query<EventQuery>, QueryRejection>,
) -> Result<Json<EventSummary>, ApiError> {
    let Query(query) = query?;
    let filters = query.into_filters(chrono::Utc::now())?;
    Ok(Json(state.store.summary(&filters)?))
}

/// GET /events/{id}
pub async fn get_event(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Event>, ApiError> {
    let Path(id) = id?;
    state
        .store
        .get_event(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", id)))
}

/// DELETE /events/{id} - reports whether a row was removed.
pub async fn delete_event(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let Path(id) = id?;
    let deleted = state.store.delete_event(id)?;
    Ok(Json(DeleteResponse { id, deleted }))
}

/// POST /events/purge?days=N&dry_run=true
pub async fn purge_events(
    State(state): State<AppState>,
    query: Result<Query<PurgeRequest>, QueryRejection>,
) -> Result<Json<PurgeResult>, ApiError> {
    let Query(req) = query?;
    Ok(Json(workflow::purge(&state, req)?))
}

// =============================================================================
// Insight
// =============================================================================

/// GET /hotspots
pub async fn hotspots(
    State(state): State<AppState>,
    query: Result<Query<HotspotQuery>, QueryRejection>,
) -> Result<Json<HotspotsResponse>, ApiError> {
    let Query(query) = query?;
    Ok(Json(workflow::hotspots(&state, query)?))
}

/// POST /estimate
pub async fn estimate(
    State(state): State<AppState>,
    payload: Result<Json<EstimateRequest>, JsonRejection>,
) -> Result<Json<Estimate>, ApiError> {
    let Json(req) = payload?;
    let estimate = state
        .estimator
        .estimate(req.item_count, req.item_types.as_ref())?;
    Ok(Json(estimate))
}

/// POST /reports
pub async fn create_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<Report>, ApiError> {
    let Json(req) = payload?;
    let format = req.report_format()?;
    workflow::generate_report(&state, req.event_id, format, req.enhance)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", req.event_id)))
}

/// POST /analyze - raw image bytes in the body, options in the query.
pub async fn analyze(
    State(state): State<AppState>,
    options: Result<Query<AnalyzeOptions>, QueryRejection>,
    body: Bytes,
) -> Result<Json<AnalyzeOutcome>, ApiError> {
    let Query(options) = options?;
    Ok(Json(workflow::analyze(&state, &body, options).await?))
}
