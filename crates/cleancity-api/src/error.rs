//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use cleancity_core::error::CleanCityError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "validation_error", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - malformed body or query string.
    BadRequest(String),
    /// 404 Not Found - resource does not exist.
    NotFound(String),
    /// 422 Unprocessable Entity - a field failed validation.
    Validation { field: String, message: String },
    /// 500 Internal Server Error - the event store failed.
    Storage(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - an external provider failed.
    Provider(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Validation { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                message,
                Some(serde_json::json!({ "field": field })),
            ),
            ApiError::Storage(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg, None)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
            ApiError::Provider(msg) => (StatusCode::BAD_GATEWAY, "provider_error", msg, None),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = error_code, %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<CleanCityError> for ApiError {
    fn from(err: CleanCityError) -> Self {
        match err {
            CleanCityError::Validation { field, message } => ApiError::Validation {
                message: format!("Invalid {}: {}", field, message),
                field,
            },
            CleanCityError::Storage(msg) => ApiError::Storage(msg),
            CleanCityError::Provider(msg) => ApiError::Provider(msg),
            CleanCityError::Config(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
