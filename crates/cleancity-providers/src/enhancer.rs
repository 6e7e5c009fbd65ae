//! Report enhancement through a hosted language model.
//!
//! The backend is chosen once from [`ProviderConfig`]. When a cloud backend
//! is selected but no API key is available the offline enhancer is used, so
//! report generation never depends on network access.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use cleancity_core::config::{ProviderConfig, ProviderKind};

use crate::error::ProviderError;

const SYSTEM_PROMPT: &str =
    "You are a professional environmental reporter writing to city officials.";
const TEMPERATURE: f32 = 0.5;
const MAX_ERROR_BODY: usize = 500;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Rewrites a template report into more natural prose.
#[async_trait]
pub trait ReportEnhancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate report text for `prompt`.
    ///
    /// `Ok(None)` means the backend does not enhance and the template report
    /// should be used as is.
    async fn enhance(&self, prompt: &str) -> Result<Option<String>, ProviderError>;
}

/// Enhancer that never rewrites anything.
#[derive(Debug, Clone, Default)]
pub struct OfflineEnhancer;

#[async_trait]
impl ReportEnhancer for OfflineEnhancer {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn enhance(&self, _prompt: &str) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Settings shared by the hosted backends.
#[derive(Clone)]
struct Endpoint {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl Endpoint {
    fn new(
        config: &ProviderConfig,
        api_key: String,
        default_base_url: &str,
        default_model: &str,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: non_empty_or(&config.base_url, default_base_url)
                .trim_end_matches('/')
                .to_string(),
            model: non_empty_or(&config.model, default_model).to_string(),
            max_tokens: config.max_tokens.clamp(1, 4096),
        })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

pub(crate) fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value.trim()
    }
}

/// Map HTTP failures to provider errors and decode the JSON body.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();

    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimit);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ProviderError::AuthenticationFailed);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let text: String = text.chars().take(MAX_ERROR_BODY).collect();
        return Err(ProviderError::InvalidResponse(format!("HTTP {}: {}", status, text)));
    }

    Ok(response.json().await?)
}

pub(crate) fn non_empty_text(text: Option<&str>) -> Result<String, ProviderError> {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ProviderError::InvalidResponse("empty completion".to_string())),
    }
}

/// Anthropic Messages API backend.
#[derive(Debug, Clone)]
pub struct AnthropicEnhancer {
    endpoint: Endpoint,
}

impl AnthropicEnhancer {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: Endpoint::new(config, api_key, ANTHROPIC_BASE_URL, ANTHROPIC_DEFAULT_MODEL)?,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "system": SYSTEM_PROMPT,
            "max_tokens": self.endpoint.max_tokens,
            "temperature": TEMPERATURE,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }

    fn parse_response(json: &Value) -> Result<String, ProviderError> {
        non_empty_text(json["content"][0]["text"].as_str())
    }
}

#[async_trait]
impl ReportEnhancer for AnthropicEnhancer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn enhance(&self, prompt: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .endpoint
            .client
            .post(format!("{}/messages", self.endpoint.base_url))
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let json = read_json(response).await?;
        Self::parse_response(&json).map(Some)
    }
}

/// OpenAI Chat Completions backend.
#[derive(Debug, Clone)]
pub struct OpenAiEnhancer {
    endpoint: Endpoint,
}

impl OpenAiEnhancer {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: Endpoint::new(config, api_key, OPENAI_BASE_URL, OPENAI_DEFAULT_MODEL)?,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "max_tokens": self.endpoint.max_tokens,
            "temperature": TEMPERATURE,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        })
    }

    fn parse_response(json: &Value) -> Result<String, ProviderError> {
        non_empty_text(json["choices"][0]["message"]["content"].as_str())
    }
}

#[async_trait]
impl ReportEnhancer for OpenAiEnhancer {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn enhance(&self, prompt: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .endpoint
            .client
            .post(format!("{}/chat/completions", self.endpoint.base_url))
            .bearer_auth(&self.endpoint.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let json = read_json(response).await?;
        Self::parse_response(&json).map(Some)
    }
}

/// Build the configured enhancer, reading the API key from the environment.
pub fn build_enhancer(config: &ProviderConfig) -> Arc<dyn ReportEnhancer> {
    build_enhancer_with(config, |name| std::env::var(name).ok())
}

/// Build the configured enhancer with an explicit key lookup.
///
/// Falls back to [`OfflineEnhancer`] when the key is missing or the HTTP
/// client cannot be constructed.
pub fn build_enhancer_with<F>(config: &ProviderConfig, lookup_key: F) -> Arc<dyn ReportEnhancer>
where
    F: Fn(&str) -> Option<String>,
{
    let default_env = match config.kind {
        ProviderKind::Offline => {
            info!("Report enhancement: offline");
            return Arc::new(OfflineEnhancer);
        }
        ProviderKind::Anthropic => ANTHROPIC_KEY_ENV,
        ProviderKind::OpenAi => OPENAI_KEY_ENV,
    };
    let env = non_empty_or(&config.api_key_env, default_env);

    let api_key = match lookup_key(env).filter(|k| !k.trim().is_empty()) {
        Some(key) => key,
        None => {
            warn!(
                provider = config.kind.as_str(),
                env, "API key not set, falling back to offline report enhancement"
            );
            return Arc::new(OfflineEnhancer);
        }
    };

    let built: Result<Arc<dyn ReportEnhancer>, ProviderError> = match config.kind {
        ProviderKind::Anthropic => {
            AnthropicEnhancer::new(config, api_key).map(|e| Arc::new(e) as Arc<dyn ReportEnhancer>)
        }
        ProviderKind::OpenAi => {
            OpenAiEnhancer::new(config, api_key).map(|e| Arc::new(e) as Arc<dyn ReportEnhancer>)
        }
        ProviderKind::Offline => Ok(Arc::new(OfflineEnhancer)),
    };

    match built {
        Ok(enhancer) => {
            info!(provider = enhancer.name(), "Report enhancement enabled");
            enhancer
        }
        Err(e) => {
            warn!(error = %e, "Failed to build report enhancer, using offline");
            Arc::new(OfflineEnhancer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_offline_returns_none() {
        assert!(OfflineEnhancer.enhance("anything").await.unwrap().is_none());
    }

    #[test]
    fn test_build_offline() {
        let enhancer = build_enhancer_with(&config(ProviderKind::Offline), |_| {
            Some("unused".to_string())
        });
        assert_eq!(enhancer.name(), "offline");
    }

    #[test]
    fn test_build_without_key_falls_back() {
        let enhancer = build_enhancer_with(&config(ProviderKind::Anthropic), |_| None);
        assert_eq!(enhancer.name(), "offline");

        let enhancer =
            build_enhancer_with(&config(ProviderKind::OpenAi), |_| Some("  ".to_string()));
        assert_eq!(enhancer.name(), "offline");
    }

    #[test]
    fn test_build_reads_configured_env_name() {
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.api_key_env = "CITY_LLM_KEY".to_string();
        let enhancer = build_enhancer_with(&cfg, |name| {
            (name == "CITY_LLM_KEY").then(|| "sk-test".to_string())
        });
        assert_eq!(enhancer.name(), "openai");

        let enhancer = build_enhancer_with(&config(ProviderKind::Anthropic), |name| {
            (name == ANTHROPIC_KEY_ENV).then(|| "key".to_string())
        });
        assert_eq!(enhancer.name(), "anthropic");
    }

    #[test]
    fn test_anthropic_request_body() {
        let mut cfg = config(ProviderKind::Anthropic);
        cfg.max_tokens = 10_000;
        let enhancer = AnthropicEnhancer::new(&cfg, "key".to_string()).unwrap();
        let body = enhancer.request_body("Write it");
        assert_eq!(body["model"], ANTHROPIC_DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][0]["content"], "Write it");
    }

    #[test]
    fn test_openai_request_body_uses_configured_model() {
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.model = "gpt-4o-mini".to_string();
        let enhancer = OpenAiEnhancer::new(&cfg, "key".to_string()).unwrap();
        let body = enhancer.request_body("Write it");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Write it");
    }

    #[test]
    fn test_parse_responses() {
        let anthropic = json!({"content": [{"type": "text", "text": " Dear city "}]});
        assert_eq!(AnthropicEnhancer::parse_response(&anthropic).unwrap(), "Dear city");

        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "Hello"}}]});
        assert_eq!(OpenAiEnhancer::parse_response(&openai).unwrap(), "Hello");

        let empty = json!({"content": []});
        assert!(matches!(
            AnthropicEnhancer::parse_response(&empty),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.base_url = "http://localhost:8080/v1/".to_string();
        let enhancer = OpenAiEnhancer::new(&cfg, "key".to_string()).unwrap();
        assert_eq!(enhancer.endpoint.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let mut cfg = config(ProviderKind::Anthropic);
        cfg.base_url = "http://127.0.0.1:9".to_string();
        cfg.timeout_secs = 2;
        let enhancer = AnthropicEnhancer::new(&cfg, "key".to_string()).unwrap();
        let result = enhancer.enhance("prompt").await;
        assert!(matches!(result, Err(ProviderError::Http(_))));
    }
}
