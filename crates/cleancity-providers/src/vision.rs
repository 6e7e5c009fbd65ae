//! Vision provider seam.
//!
//! Litter detection runs on a hosted multimodal model ([`GeminiVision`]).
//! Callers may also supply detections obtained elsewhere
//! ([`StaticVision`]). Without either, [`OfflineVision`] refuses to analyze
//! so no event is ever stored with a count nobody detected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use cleancity_core::config::{VisionConfig, VisionKind};
use cleancity_core::types::Detection;

use crate::enhancer::{non_empty_or, non_empty_text, read_json};
use crate::error::ProviderError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";
const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

const DETECTION_PROMPT: &str = "Analyze this image for trash and litter. List every visible \
item individually and be specific (\"plastic bottle\", \"cigarette butt\", not just \"trash\"). \
Respond with a JSON array only. Each element must have \"object_type\" (snake_case string), \
\"confidence\" (number between 0 and 1) and \"bounding_box\" ([x1, y1, x2, y2] in pixels). \
Respond with [] when the image contains no litter.";

/// Detects litter objects in an image.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detect objects in raw image bytes (any container format).
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, ProviderError>;
}

/// Vision provider used when no detector is configured.
#[derive(Debug, Clone, Default)]
pub struct OfflineVision;

#[async_trait]
impl VisionProvider for OfflineVision {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, ProviderError> {
        if image.is_empty() {
            return Err(ProviderError::InvalidInput("empty image data".to_string()));
        }
        Err(ProviderError::Unavailable(
            "no vision backend configured; set [vision] kind = \"gemini\" or supply detections"
                .to_string(),
        ))
    }
}

/// Returns a fixed set of detections for any image.
///
/// Used when detections were produced outside the process (for example a
/// JSON file written by an external detector) and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticVision {
    detections: Vec<Detection>,
}

impl StaticVision {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Parse a JSON array of detections.
    pub fn from_json(json: &str) -> Result<Self, ProviderError> {
        let detections: Vec<Detection> = serde_json::from_str(json)?;
        Ok(Self::new(detections))
    }
}

#[async_trait]
impl VisionProvider for StaticVision {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn detect(&self, _image: &[u8]) -> Result<Vec<Detection>, ProviderError> {
        Ok(self.detections.clone())
    }
}

/// Google Gemini `generateContent` backend.
#[derive(Clone)]
pub struct GeminiVision {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiVision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiVision")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiVision {
    pub fn new(config: &VisionConfig, api_key: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: non_empty_or(&config.base_url, GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: non_empty_or(&config.model, GEMINI_DEFAULT_MODEL).to_string(),
        })
    }

    fn request_body(image: &[u8]) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": DETECTION_PROMPT },
                    {
                        "inline_data": {
                            "mime_type": sniff_mime(image),
                            "data": STANDARD.encode(image),
                        }
                    }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.1,
            },
        })
    }

    fn parse_response(json: &Value) -> Result<Vec<Detection>, ProviderError> {
        let text = non_empty_text(json["candidates"][0]["content"]["parts"][0]["text"].as_str())?;
        parse_detections(&text)
    }
}

#[async_trait]
impl VisionProvider for GeminiVision {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, ProviderError> {
        if image.is_empty() {
            return Err(ProviderError::InvalidInput("empty image data".to_string()));
        }
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(image))
            .send()
            .await?;

        let json = read_json(response).await?;
        let detections = Self::parse_response(&json)?;
        debug!(count = detections.len(), "Gemini detections parsed");
        Ok(detections)
    }
}

/// Model output before normalization. Coordinates may come back as
/// floats and confidence may be omitted.
#[derive(Debug, Deserialize)]
struct ModelDetection {
    #[serde(alias = "label", alias = "item")]
    object_type: String,
    #[serde(default, alias = "score")]
    confidence: Option<f64>,
    #[serde(default, alias = "bbox")]
    bounding_box: Option<[f64; 4]>,
}

impl From<ModelDetection> for Detection {
    fn from(raw: ModelDetection) -> Self {
        let bbox = raw.bounding_box.unwrap_or_default();
        Detection {
            object_type: raw.object_type.trim().to_lowercase().replace(' ', "_"),
            confidence: raw.confidence.unwrap_or(1.0).clamp(0.0, 1.0) as f32,
            bounding_box: bbox.map(|v| v.round() as i32),
        }
    }
}

/// Parse the model's JSON answer, tolerating a Markdown code fence.
fn parse_detections(text: &str) -> Result<Vec<Detection>, ProviderError> {
    let body = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let raw: Vec<ModelDetection> = serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("detections are not a JSON array: {}", e))
    })?;
    Ok(raw
        .into_iter()
        .filter(|d| !d.object_type.trim().is_empty())
        .map(Detection::from)
        .collect())
}

/// Image MIME type from the file signature. Unknown data is sent as JPEG.
fn sniff_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// Build the configured vision provider, reading the API key from the
/// environment.
pub fn build_vision(config: &VisionConfig) -> Result<Arc<dyn VisionProvider>, ProviderError> {
    build_vision_with(config, |name| std::env::var(name).ok())
}

/// Build the configured vision provider with an explicit key lookup.
pub fn build_vision_with<F>(
    config: &VisionConfig,
    lookup_key: F,
) -> Result<Arc<dyn VisionProvider>, ProviderError>
where
    F: Fn(&str) -> Option<String>,
{
    match config.kind {
        VisionKind::Offline => {
            info!("Vision: offline, image analysis disabled");
            Ok(Arc::new(OfflineVision))
        }
        VisionKind::Gemini => {
            let env = non_empty_or(&config.api_key_env, GEMINI_KEY_ENV);
            let api_key = lookup_key(env)
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ProviderError::MissingApiKey {
                    provider: config.kind.as_str(),
                    env: env.to_string(),
                })?;
            let vision = GeminiVision::new(config, api_key)?;
            info!(model = %vision.model, "Vision: gemini");
            Ok(Arc::new(vision))
        }
    }
}
