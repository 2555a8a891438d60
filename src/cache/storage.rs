//! Cache storage backends.
//!
//! A [`Storage`] is a plain key/value store for [`CacheMetadata`]. It knows
//! nothing about expiry or versions; [`CacheManager`](super::CacheManager)
//! applies those rules on top. Backends report failures as absence.

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheMetadata;

/// Key/value persistence for cached responses.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the stored metadata, or `None` when absent or unreadable.
    async fn get(&self, key: &str) -> Option<CacheMetadata>;

    /// Stores `metadata` under `key`, returning whether the write succeeded.
    async fn set(&self, key: &str, metadata: CacheMetadata) -> bool;

    async fn exists(&self, key: &str) -> bool;
}

/// Process-local storage backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, CacheMetadata>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Option<CacheMetadata> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn set(&self, key: &str, metadata: CacheMetadata) -> bool {
        self.entries.insert(key.to_owned(), metadata);
        true
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// Storage that keeps nothing. The default for clients without a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

#[async_trait]
impl Storage for NoopStorage {
    async fn get(&self, _key: &str) -> Option<CacheMetadata> {
        None
    }

    async fn set(&self, _key: &str, _metadata: CacheMetadata) -> bool {
        false
    }

    async fn exists(&self, _key: &str) -> bool {
        false
    }
}
