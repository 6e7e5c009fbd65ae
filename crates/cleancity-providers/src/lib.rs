//! CleanCity providers crate: external collaborators behind narrow traits.
//!
//! Provides the [`VisionProvider`] backends for litter detection (Gemini,
//! static, offline) and the [`ReportEnhancer`] backends (Anthropic, OpenAI,
//! offline) used to polish generated reports.

pub mod enhancer;
pub mod error;
pub mod vision;

pub use enhancer::{
    build_enhancer, build_enhancer_with, AnthropicEnhancer, OfflineEnhancer, OpenAiEnhancer,
    ReportEnhancer,
};
pub use error::ProviderError;
pub use vision::{
    build_vision, build_vision_with, GeminiVision, OfflineVision, StaticVision, VisionProvider,
};
