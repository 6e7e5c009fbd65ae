use thiserror::Error;

/// Top-level error type for CleanCity.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for CleanCityError` so that `?` works across crate
/// boundaries. Every variant carries a stable [`kind`](CleanCityError::kind)
/// tag for callers that need to branch on the failure class.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CleanCityError {
    /// Bad caller input. Never retried, never reaches storage.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// SQLite or transaction failure, including lock timeouts.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Vision or report-enhancement provider failure.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CleanCityError {
    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CleanCityError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable tag for this error class.
    pub fn kind(&self) -> &'static str {
        match self {
            CleanCityError::Validation { .. } => "validation_error",
            CleanCityError::Storage(_) => "storage_error",
            CleanCityError::Config(_) => "config_error",
            CleanCityError::Provider(_) => "provider_error",
            CleanCityError::Io(_) => "io_error",
            CleanCityError::Serialization(_) => "serialization_error",
        }
    }

    /// The offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            CleanCityError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for CleanCityError {
    fn from(err: toml::de::Error) -> Self {
        CleanCityError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CleanCityError {
    fn from(err: serde_json::Error) -> Self {
        CleanCityError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for CleanCity operations.
pub type Result<T> = std::result::Result<T, CleanCityError>;
