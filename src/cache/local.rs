//! Local file system cache backend

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use super::key::{METADATA_SUFFIX, TEMP_MARKER};
use super::{CacheEntry, CacheKey, CacheStore, EntryMetadata};
use crate::error::AppError;

/// Stores each artifact as `{root}/{key}` with a `{key}.meta.json` sidecar.
///
/// Writes go to a temporary file that is renamed into place, metadata first and
/// data last, so a reader that sees the data file always finds its metadata.
#[derive(Debug, Clone)]
pub struct LocalCacheStore {
    root: PathBuf,
}

impl LocalCacheStore {
    /// Create a new local cache rooted at `root`, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::Config(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;

        info!("Local artifact cache initialized at: {}", root.display());
        Ok(Self { root })
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn metadata_path(data_path: &Path) -> PathBuf {
        let mut name = data_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(METADATA_SUFFIX);
        data_path.with_file_name(name)
    }

    async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), AppError> {
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(format!("{}{}", TEMP_MARKER, Uuid::new_v4()));
        let tmp_path = path.with_file_name(tmp_name);

        fs::write(&tmp_path, content)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to write {}: {}", tmp_path.display(), e)))?;

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(AppError::Persistence(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
        let data_path = self.data_path(key);

        let bytes = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            // A key prefix such as `images/low` names a directory, not an artifact
            Err(_) if is_dir(&data_path).await => return Ok(None),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to read cached artifact {}: {}",
                    key, e
                )))
            }
        };

        // Only a data file with its sidecar is a stored artifact
        let metadata_raw = match fs::read(Self::metadata_path(&data_path)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "Data file without metadata, treating as absent");
                return Ok(None);
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to read metadata for {}: {}",
                    key, e
                )))
            }
        };
        let metadata: EntryMetadata = serde_json::from_slice(&metadata_raw)?;

        debug!(key = %key, size = bytes.len(), "Local cache hit");
        Ok(Some(CacheEntry {
            bytes: bytes.into(),
            content_type: metadata.content_type,
            cache_control: metadata.cache_control,
        }))
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), AppError> {
        let data_path = self.data_path(key);

        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Persistence(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let metadata = EntryMetadata {
            content_type: entry.content_type.clone(),
            cache_control: entry.cache_control.clone(),
            size: entry.bytes.len() as u64,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let metadata_json = serde_json::to_vec(&metadata)
            .map_err(|e| AppError::Persistence(format!("Failed to encode metadata: {}", e)))?;

        Self::write_atomic(&Self::metadata_path(&data_path), &metadata_json).await?;
        Self::write_atomic(&data_path, &entry.bytes).await?;

        debug!(key = %key, size = entry.bytes.len(), "Artifact stored in local cache");
        Ok(())
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey::parse("images/low/1024x1024/1/0a1b2c").unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).await.unwrap();

        let entry = CacheEntry::new(vec![0x89u8, b'P', b'N', b'G'], "image/png")
            .with_cache_control("public, max-age=60");
        store.put(&key(), entry.clone()).await.unwrap();

        let loaded = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(dir.path().join("images/low/1024x1024/1/0a1b2c").exists());
        assert!(dir.path().join("images/low/1024x1024/1/0a1b2c.meta.json").exists());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).await.unwrap();
        assert!(store.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_variant_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).await.unwrap();

        store.put(&key(), CacheEntry::new(vec![1u8], "image/png")).await.unwrap();
        store
            .put(&key().variant(1), CacheEntry::new(vec![2u8], "image/png"))
            .await
            .unwrap();

        assert_eq!(store.get(&key()).await.unwrap().unwrap().bytes.as_ref(), &[1]);
        assert_eq!(
            store.get(&key().variant(1)).await.unwrap().unwrap().bytes.as_ref(),
            &[2]
        );
    }

    #[tokio::test]
    async fn test_directory_and_orphan_data_are_absent() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).await.unwrap();
        store.put(&key(), CacheEntry::new(vec![1u8], "image/png")).await.unwrap();

        let prefix = CacheKey::parse("images/low/1024x1024").unwrap();
        assert!(store.get(&prefix).await.unwrap().is_none());

        std::fs::write(dir.path().join("images/low/1024x1024/1/orphan"), b"x").unwrap();
        let orphan = CacheKey::parse("images/low/1024x1024/1/orphan").unwrap();
        assert!(store.get(&orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalCacheStore::new(dir.path()).await.unwrap();
        store.put(&key(), CacheEntry::new(vec![7u8; 32], "image/webp")).await.unwrap();

        let parent = dir.path().join("images/low/1024x1024/1");
        let names: Vec<String> = std::fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.contains(".tmp-")));
    }
}
