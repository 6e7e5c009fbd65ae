//! Fixed-window rate limiter middleware.
//!
//! Counts requests per wall-clock second with atomics shared across all
//! handler tasks. Requests over the limit get a 429 with the standard error
//! body.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ErrorBody;

/// Requests allowed per second on the event routes.
pub const DEFAULT_REQUESTS_PER_SEC: u64 = 100;

/// Shared state for the rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_per_sec: u64,
    /// Requests seen in the active window.
    count: Arc<AtomicU64>,
    /// Epoch second of the active window.
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Try to take a permit for the current second.
    pub fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }

    fn try_acquire_at(&self, second: u64) -> bool {
        let current = self.window.load(Ordering::Acquire);
        if second != current
            && self
                .window
                .compare_exchange(current, second, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // This caller opened the window.
            self.count.store(1, Ordering::Release);
            return self.max_per_sec > 0;
        }

        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        prev < self.max_per_sec
    }
}

/// Axum middleware that enforces the rate limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        return next.run(req).await;
    }

    tracing::warn!(path = %req.uri().path(), "Rate limit exceeded");
    let body = ErrorBody {
        error: "too_many_requests".to_string(),
        message: "Rate limit exceeded".to_string(),
        details: None,
    };
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, "1")],
        Json(body),
    )
        .into_response()
}
