//! Artifact cache: a keyed object store consulted before any charge.
//!
//! The pipeline only depends on [`CacheStore`]; the in-memory and local-disk
//! backends here are selected from `[cache]` in the configuration.

pub mod key;
pub mod local;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use key::CacheKey;
pub use local::LocalCacheStore;
pub use memory::MemoryCacheStore;

/// Default cache policy for stored artifacts; a key always maps to the same bytes
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// A stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

impl CacheEntry {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
        }
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = cache_control.into();
        self
    }
}

/// Metadata persisted next to the artifact bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub content_type: String,
    pub cache_control: String,
    pub size: u64,
    pub created_at: i64,
}

/// Keyed object storage for generated artifacts.
///
/// `get` must not have side effects. `put` is best-effort from the pipeline's
/// point of view: its failures are logged by the persist worker, never surfaced.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Backend name for logs (e.g. "memory", "local")
    fn backend(&self) -> &str;

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AppError>;

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), AppError>;
}
