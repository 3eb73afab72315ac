use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{GenerationRequest, ValidationError};

const KEY_PREFIX: &str = "images";
const MAX_KEY_LEN: usize = 256;

/// Suffix of the metadata sidecar a file-backed store keeps next to each artifact
pub(crate) const METADATA_SUFFIX: &str = ".meta.json";
/// Marker of in-progress temporary files in a file-backed store
pub(crate) const TEMP_MARKER: &str = ".tmp-";

/// Canonical storage and retrieval key of a generated artifact.
///
/// Layout: `images/{quality}/{size}/{count}/{sha256 of normalized prompt}`.
/// Additional images of a multi-image generation live under `{key}-{index}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &GenerationRequest) -> Self {
        let digest = Sha256::digest(normalize_prompt(request.prompt()).as_bytes());
        Self(format!(
            "{}/{}/{}/{}/{:x}",
            KEY_PREFIX,
            request.quality(),
            request.size(),
            request.count(),
            digest
        ))
    }

    /// Parse a key received on the artifact retrieval path.
    ///
    /// Only `[A-Za-z0-9._-]` segments are accepted, and `.`/`..` segments are rejected,
    /// so a key always maps to a location inside the store. Names reserved for store
    /// bookkeeping (metadata sidecars, temporary files) are not artifacts.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let key = raw.trim_matches('/');
        let invalid = || ValidationError::InvalidKey(raw.to_string());

        if key.len() > MAX_KEY_LEN || key.split('/').next() != Some(KEY_PREFIX) {
            return Err(invalid());
        }

        for segment in key.split('/') {
            let valid_segment = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                && !segment.ends_with(METADATA_SUFFIX)
                && !segment.contains(TEMP_MARKER);
            if !valid_segment {
                return Err(invalid());
            }
        }

        Ok(Self(key.to_string()))
    }

    /// Key of the image at `index` in a multi-image generation; index 0 is the key itself
    pub fn variant(&self, index: usize) -> CacheKey {
        if index == 0 {
            self.clone()
        } else {
            Self(format!("{}-{}", self.0, index))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse whitespace runs so cosmetic spacing differences share one key
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}
