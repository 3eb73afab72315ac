use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheEntry, CacheKey, CacheStore};
use crate::error::AppError;

/// Process-local cache, lost on restart
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), AppError> {
        // First write wins; entries are never mutated once stored
        self.entries.entry(key.clone()).or_insert(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::parse("images/low/1024x1024/1/abc").unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryCacheStore::new();
        assert!(store.get(&key()).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryCacheStore::new();
        store
            .put(&key(), CacheEntry::new(vec![1u8, 2, 3], "image/png"))
            .await
            .unwrap();

        let entry = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(entry.content_type, "image/png");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_entry_is_not_overwritten() {
        let store = MemoryCacheStore::new();
        store.put(&key(), CacheEntry::new(vec![1u8], "image/png")).await.unwrap();
        store.put(&key(), CacheEntry::new(vec![2u8], "image/jpeg")).await.unwrap();

        let entry = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(entry.bytes.as_ref(), &[1]);
    }
}
