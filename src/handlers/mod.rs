pub mod artifacts;
pub mod balance;
pub mod health;
pub mod images;
pub mod metrics_handler;
pub mod quote;

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::cache::CacheEntry;
use crate::error::AppError;
use crate::models::{RawGenerationRequest, RequestLimits};
use crate::pipeline::GenerationPipeline;

/// Shared state for the image routes
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GenerationPipeline>,
    pub limits: RequestLimits,
}

/// Path segments shared by `/v1/images` and `/v1/quote`
#[derive(Debug, Deserialize)]
pub struct ImagePath {
    pub quality: String,
    pub size: String,
    pub prompt: String,
}

/// Optional query parameters shared by `/v1/images` and `/v1/quote`
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub n: Option<u32>,
    pub cached_text_tokens: Option<u64>,
    pub input_image_tokens: Option<u64>,
}

impl ImagePath {
    pub fn into_raw(self, query: ImageQuery) -> RawGenerationRequest {
        RawGenerationRequest {
            prompt: self.prompt,
            size: self.size,
            quality: self.quality,
            n: query.n,
            cached_text_tokens: query.cached_text_tokens,
            input_image_tokens: query.input_image_tokens,
        }
    }
}

/// Raw artifact bytes with their stored content type and cache policy
pub(crate) fn artifact_response(
    entry: CacheEntry,
    extra_headers: &[(&'static str, String)],
) -> Result<Response, AppError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, header_value(&entry.content_type)?)
        .header(header::CACHE_CONTROL, header_value(&entry.cache_control)?);

    for (name, value) in extra_headers {
        builder = builder.header(HeaderName::from_static(name), header_value(value)?);
    }

    builder
        .body(Body::from(entry.bytes))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Internal(format!("Invalid header value '{}': {}", value, e)))
}
