use serde::{Deserialize, Serialize};

/// Body of `POST /images/generations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    /// Model to use
    pub model: String,
    /// Text description of the desired image
    pub prompt: String,
    /// Number of images to generate
    pub n: u32,
    /// Requested dimensions, e.g. "1024x1024"
    pub size: String,
    /// Quality tier ("low", "medium", "high", "auto")
    pub quality: String,
    /// Encoding of returned images ("png", "jpeg", "webp")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

/// Response of `POST /images/generations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub data: Vec<ImageData>,
}

/// A single generated image, either inline or by reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accepts_url_and_inline_items() {
        let json = r#"{
            "created": 1713833628,
            "data": [
                {"b64_json": "aGVsbG8="},
                {"url": "https://cdn.example.com/img.png", "revised_prompt": "a cat"}
            ]
        }"#;
        let response: ImageGenerationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].b64_json.as_deref(), Some("aGVsbG8="));
        assert!(response.data[1].b64_json.is_none());
        assert_eq!(
            response.data[1].url.as_deref(),
            Some("https://cdn.example.com/img.png")
        );
    }

    #[test]
    fn test_request_omits_unset_output_format() {
        let request = ImageGenerationRequest {
            model: "gpt-image-1".to_string(),
            prompt: "cat".to_string(),
            n: 1,
            size: "1024x1024".to_string(),
            quality: "low".to_string(),
            output_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("output_format").is_none());
        assert_eq!(value["n"], 1);
    }
}
