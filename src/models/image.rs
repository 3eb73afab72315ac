use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::cache::CacheKey;

/// Output image dimensions accepted by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[serde(rename = "1536x1024")]
    Landscape,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [Self::Square, Self::Portrait, Self::Landscape];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Portrait => "1024x1536",
            Self::Landscape => "1536x1024",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == s.trim())
            .ok_or_else(|| ValidationError::UnknownSize(s.to_string()))
    }
}

/// Quality tier requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Low,
    Medium,
    High,
    /// Provider picks the tier; billed as `High`
    Auto,
}

impl ImageQuality {
    pub const ALL: [ImageQuality; 4] = [Self::Low, Self::Medium, Self::High, Self::Auto];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Auto => "auto",
        }
    }

    /// Tier whose output prices apply to this quality
    pub fn pricing_tier(&self) -> ImageQuality {
        match self {
            Self::Auto => Self::High,
            other => *other,
        }
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageQuality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|quality| quality.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownQuality(s.to_string()))
    }
}

/// Request field validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("prompt is too long: {len} characters (max {max})")]
    PromptTooLong { len: usize, max: usize },
    #[error("unknown image size '{0}' (expected one of: 1024x1024, 1024x1536, 1536x1024)")]
    UnknownSize(String),
    #[error("unknown quality tier '{0}' (expected one of: low, medium, high, auto)")]
    UnknownQuality(String),
    #[error("count must be between 1 and {max}, got {count}")]
    CountOutOfRange { count: u32, max: u32 },
    #[error("invalid artifact key '{0}'")]
    InvalidKey(String),
}

/// Bounds applied while validating requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimits {
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_max_count")]
    pub max_count: u32,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            max_count: default_max_count(),
        }
    }
}

fn default_max_prompt_chars() -> usize {
    4000
}

fn default_max_count() -> u32 {
    4
}

/// Request fields as received from a caller, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGenerationRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub cached_text_tokens: Option<u64>,
    #[serde(default)]
    pub input_image_tokens: Option<u64>,
}

impl RawGenerationRequest {
    pub fn validate(self, limits: &RequestLimits) -> Result<GenerationRequest, ValidationError> {
        let size = self.size.parse::<ImageSize>()?;
        let quality = self.quality.parse::<ImageQuality>()?;
        let request = GenerationRequest::new(
            &self.prompt,
            size,
            quality,
            self.n.unwrap_or(1),
            limits,
        )?;
        Ok(request.with_cost_inputs(self.cached_text_tokens, self.input_image_tokens.unwrap_or(0)))
    }
}

/// A validated image generation request.
///
/// Fields are private so the only way to obtain one is through validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    prompt: String,
    size: ImageSize,
    quality: ImageQuality,
    count: u32,
    cached_text_tokens: Option<u64>,
    input_image_tokens: u64,
}

impl GenerationRequest {
    pub fn new(
        prompt: &str,
        size: ImageSize,
        quality: ImageQuality,
        count: u32,
        limits: &RequestLimits,
    ) -> Result<Self, ValidationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }

        let len = prompt.chars().count();
        if len > limits.max_prompt_chars {
            return Err(ValidationError::PromptTooLong {
                len,
                max: limits.max_prompt_chars,
            });
        }

        if count == 0 || count > limits.max_count {
            return Err(ValidationError::CountOutOfRange {
                count,
                max: limits.max_count,
            });
        }

        Ok(Self {
            prompt: prompt.to_string(),
            size,
            quality,
            count,
            cached_text_tokens: None,
            input_image_tokens: 0,
        })
    }

    /// Attach optional token counts used only for pricing
    pub fn with_cost_inputs(mut self, cached_text_tokens: Option<u64>, input_image_tokens: u64) -> Self {
        self.cached_text_tokens = cached_text_tokens;
        self.input_image_tokens = input_image_tokens;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn quality(&self) -> ImageQuality {
        self.quality
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn cached_text_tokens(&self) -> Option<u64> {
        self.cached_text_tokens
    }

    pub fn input_image_tokens(&self) -> u64 {
        self.input_image_tokens
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(self)
    }
}
