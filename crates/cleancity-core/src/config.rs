use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CleanCityError, Result};

/// Top-level configuration for CleanCity.
///
/// Loaded from `~/.cleancity/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanCityConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hotspots: HotspotConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

impl CleanCityConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CleanCityConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values that would make the services misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.storage.db_file.trim().is_empty() {
            return Err(CleanCityError::Config(
                "storage.db_file must not be empty".to_string(),
            ));
        }
        if self.storage.lock_timeout_ms == 0 {
            return Err(CleanCityError::Config(
                "storage.lock_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.hotspots.min_events == 0 {
            return Err(CleanCityError::Config(
                "hotspots.min_events must be at least 1".to_string(),
            ));
        }
        if !(self.estimator.hourly_rate.is_finite() && self.estimator.hourly_rate >= 0.0) {
            return Err(CleanCityError::Config(format!(
                "estimator.hourly_rate must be a non-negative number, got {}",
                self.estimator.hourly_rate
            )));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP API port (bound to localhost).
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.cleancity/data".to_string(),
            log_level: "info".to_string(),
            port: 7860,
        }
    }
}

/// Event store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub db_file: String,
    /// Maximum wait for the connection lock before failing.
    pub lock_timeout_ms: u64,
    /// SQLite busy timeout for file-level locks held by other processes.
    pub busy_timeout_ms: u64,
    /// Events older than this are removed by `purge`. 0 keeps everything.
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: "trash_events.db".to_string(),
            lock_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
            retention_days: 0,
        }
    }
}

/// Default hotspot query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    pub window_days: i64,
    pub min_events: u32,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_events: 2,
        }
    }
}

/// Cost coefficients for the resource estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Cost of one volunteer hour.
    pub hourly_rate: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self { hourly_rate: 25.0 }
    }
}

/// Which report-enhancement backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    Offline,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Offline => "offline",
        }
    }
}

/// Report-enhancement provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model name; empty selects the backend's default.
    pub model: String,
    /// Environment variable holding the API key; empty selects the
    /// backend's conventional variable.
    pub api_key_env: String,
    /// API base URL; empty selects the backend's public endpoint.
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Offline,
            model: String::new(),
            api_key_env: String::new(),
            base_url: String::new(),
            timeout_secs: 30,
            max_tokens: 500,
        }
    }
}

/// Which litter-detection backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionKind {
    Gemini,
    /// No detector; image analysis is refused.
    #[default]
    Offline,
}

impl VisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionKind::Gemini => "gemini",
            VisionKind::Offline => "offline",
        }
    }
}

/// Litter-detection provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub kind: VisionKind,
    /// Model name; empty selects the backend's default.
    pub model: String,
    /// Environment variable holding the API key; empty selects
    /// `GEMINI_API_KEY`.
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            kind: VisionKind::Offline,
            model: String::new(),
            api_key_env: String::new(),
            base_url: String::new(),
            timeout_secs: 60,
        }
    }
}
