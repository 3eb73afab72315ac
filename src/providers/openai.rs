use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::image_fetch::{decode_inline_image, fetch_image};
use super::{GeneratedImage, GenerationProvider};
use crate::{
    config::ProviderConfig,
    error::AppError,
    logging::sanitize_upstream_body,
    models::{
        openai::{ImageData, ImageGenerationRequest, ImageGenerationResponse},
        GenerationRequest,
    },
};

/// OpenAI Images API (and compatible services)
pub struct OpenAiImageProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiImageProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn build_request(&self, request: &GenerationRequest) -> ImageGenerationRequest {
        ImageGenerationRequest {
            model: self.config.model.clone(),
            prompt: request.prompt().to_string(),
            n: request.count(),
            size: request.size().to_string(),
            quality: request.quality().to_string(),
            output_format: None,
        }
    }

    async fn normalize(&self, item: ImageData) -> Result<GeneratedImage, AppError> {
        let (bytes, content_type) = match (item.b64_json, item.url) {
            (Some(data), _) => decode_inline_image(&data)?,
            (None, Some(url)) => fetch_image(&self.client, &url).await?,
            (None, None) => {
                return Err(AppError::ProviderFailure {
                    status: StatusCode::BAD_GATEWAY,
                    details: "Upstream image carried neither b64_json nor url".to_string(),
                })
            }
        };

        Ok(GeneratedImage {
            bytes,
            content_type,
            revised_prompt: item.revised_prompt,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiImageProvider {
    fn provider_type(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<GeneratedImage>, AppError> {
        let url = format!(
            "{}/images/generations",
            self.config.base_url.trim_end_matches('/')
        );
        let body = self.build_request(request);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        metrics::histogram!("image_gateway_provider_duration_seconds", "provider" => "openai")
            .record(start.elapsed().as_secs_f64());

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let details = sanitize_upstream_body(&error_text);
            warn!(status = %status, details = %details, "Image generation request failed");
            return Err(AppError::ProviderFailure { status, details });
        }

        let parsed: ImageGenerationResponse = response.json().await.map_err(|e| {
            AppError::ProviderFailure {
                status: StatusCode::BAD_GATEWAY,
                details: format!("Malformed image generation response: {}", e),
            }
        })?;

        if parsed.data.is_empty() {
            return Err(AppError::ProviderFailure {
                status: StatusCode::BAD_GATEWAY,
                details: "Upstream returned no images".to_string(),
            });
        }

        let mut images = Vec::with_capacity(parsed.data.len());
        for item in parsed.data {
            images.push(self.normalize(item).await?);
        }

        debug!(
            count = images.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upstream generation complete"
        );
        Ok(images)
    }
}
