//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use cleancity_core::config::CleanCityConfig;
use cleancity_core::error::{CleanCityError, Result};

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter, DEFAULT_REQUESTS_PER_SEC};
use crate::state::AppState;

/// Body limit for JSON routes.
const JSON_BODY_LIMIT: usize = 1024 * 1024;
/// Body limit for image uploads.
const IMAGE_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Allow the local dashboard on the API port and the one after it.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [port, port.saturating_add(1)]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let limiter = RateLimiter::new(DEFAULT_REQUESTS_PER_SEC);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let rate_limited_routes = Router::new()
        .route(
            "/events",
            get(handlers::list_events).post(handlers::create_event),
        )
        .route("/events/summary", get(handlers::events_summary))
        .route("/events/purge", post(handlers::purge_events))
        .route(
            "/events/{id}",
            get(handlers::get_event).delete(handlers::delete_event),
        )
        .route("/hotspots", get(handlers::hotspots))
        .route("/estimate", post(handlers::estimate))
        .route("/reports", post(handlers::create_report))
        .route(
            "/analyze",
            post(handlers::analyze).layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter));

    public_routes
        .merge(rate_limited_routes)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `127.0.0.1` at the configured port until the process
/// exits.
pub async fn start_server(config: &CleanCityConfig, state: AppState) -> Result<()> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CleanCityError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router).await?;
    Ok(())
}
