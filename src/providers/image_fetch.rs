use axum::http::StatusCode;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::Client;

use crate::error::AppError;

/// Largest image accepted from upstream, inline or by URL
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Content type used when neither headers nor magic bytes identify the image
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

fn bad_upstream(details: impl Into<String>) -> AppError {
    AppError::ProviderFailure {
        status: StatusCode::BAD_GATEWAY,
        details: details.into(),
    }
}

/// Decode an inline `b64_json` payload
pub fn decode_inline_image(data: &str) -> Result<(Bytes, String), AppError> {
    // Some upstreams return a data URL rather than bare base64
    let data = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, payload)| payload).unwrap_or(rest),
        None => data,
    };

    let decoded = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| bad_upstream(format!("Invalid base64 image data: {}", e)))?;

    check_size(decoded.len())?;
    let content_type = sniff_content_type(&decoded).unwrap_or(DEFAULT_CONTENT_TYPE);
    Ok((Bytes::from(decoded), content_type.to_string()))
}

/// Fetch an image returned by reference
pub async fn fetch_image(client: &Client, url: &str) -> Result<(Bytes, String), AppError> {
    // Validate URL scheme to prevent SSRF
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(bad_upstream("Only HTTP(S) image URLs are supported"));
    }

    tracing::debug!("Fetching generated image from upstream URL");

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(bad_upstream(format!(
            "Image fetch failed with status: {}",
            response.status()
        )));
    }

    if let Some(length) = response.content_length() {
        check_size(length as usize)?;
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
        .filter(|v| v.starts_with("image/"));

    let bytes = response.bytes().await?;
    check_size(bytes.len())?;

    let content_type = header_type
        .or_else(|| sniff_content_type(&bytes).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    tracing::debug!(size = bytes.len(), content_type = %content_type, "Fetched generated image");
    Ok((bytes, content_type))
}

/// Identify PNG, JPEG and WebP from magic bytes
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn check_size(len: usize) -> Result<(), AppError> {
    if len > MAX_IMAGE_BYTES {
        return Err(bad_upstream(format!(
            "Image too large: {} bytes (max: {} bytes)",
            len, MAX_IMAGE_BYTES
        )));
    }
    Ok(())
}
