pub mod image_fetch;
pub mod openai;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AppError;
use crate::models::GenerationRequest;

pub use openai::OpenAiImageProvider;

/// An image normalized into memory, whatever form the upstream returned it in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub revised_prompt: Option<String>,
}

impl GeneratedImage {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            revised_prompt: None,
        }
    }
}

/// Upstream image generation API.
///
/// Implementations return at least one image or an error; they must not touch
/// billing or the cache.
#[async_trait]
pub trait GenerationProvider: Send + Sync + 'static {
    /// Provider name for logs (e.g. "openai")
    fn provider_type(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>, AppError>;
}
