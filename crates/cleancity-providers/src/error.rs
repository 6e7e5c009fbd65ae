//! Error types for external providers.

use cleancity_core::error::CleanCityError;

/// Errors from vision and report-enhancement providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not set for provider {provider} (expected in ${env})")]
    MissingApiKey { provider: &'static str, env: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The caller's image or prompt was unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No backend is configured for this capability.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for CleanCityError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidInput(msg) => CleanCityError::validation("image", msg),
            other => CleanCityError::Provider(other.to_string()),
        }
    }
}
