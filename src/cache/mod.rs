//! Response caching.
//!
//! [`CacheManager`] derives cache keys, applies expiry and app-version rules,
//! and persists raw payloads through any [`Storage`] backend.
//!
//! - Entries are written only when the request carries a [`CacheConfig`] with
//!   a positive TTL and the config's eligibility predicate accepts the
//!   response.
//! - An entry whose `expires_at` is not after now is treated as absent. It is
//!   not evicted.
//! - An entry written by a different app version is treated as absent.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod storage;

pub use storage::{MemoryStorage, NoopStorage, Storage};

use crate::dedup::Registry;
use crate::fingerprint;
use crate::request::{CacheConfig, Request};
use crate::response::Response;

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A cached payload and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub app_version: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: Bytes,
}

impl CacheMetadata {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Cache policy layered over a [`Storage`] backend.
#[derive(Clone)]
pub struct CacheManager {
    storage: Arc<dyn Storage>,
    registry: Registry,
    app_version: String,
    clock: Clock,
}

impl CacheManager {
    pub fn new(storage: Arc<dyn Storage>, registry: Registry, app_version: impl Into<String>) -> Self {
        Self {
            storage,
            registry,
            app_version: app_version.into(),
            clock: Arc::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Derives the storage key for `request` under `config`.
    pub async fn key(&self, request: &Request, config: &CacheConfig) -> String {
        let canonical = fingerprint::cache_canonical(
            request.method(),
            &request.url(),
            request.headers(),
            request.params(),
            config.key_filter(),
            config.ttl(),
        );
        self.registry.identifier(canonical).await
    }

    /// Returns the live cached payload for `request`, if any.
    pub async fn load(&self, request: &Request) -> Option<CacheMetadata> {
        let config = request.cache()?;
        let key = self.key(request, config).await;

        let Some(metadata) = self.storage.get(&key).await else {
            debug!(url = %request.url(), %key, "cache miss");
            return None;
        };
        if metadata.is_expired_at((self.clock)()) {
            debug!(url = %request.url(), %key, expires_at = %metadata.expires_at, "cache entry expired");
            return None;
        }
        if metadata.app_version != self.app_version {
            debug!(
                url = %request.url(),
                %key,
                stored = %metadata.app_version,
                current = %self.app_version,
                "cache entry from another app version"
            );
            return None;
        }

        debug!(url = %request.url(), %key, "cache hit");
        Some(metadata)
    }

    /// Writes `response` under `request`'s key when `request`'s cache config
    /// allows it. Returns whether anything was stored.
    pub async fn save(&self, request: &Request, response: &Response) -> bool {
        let Some(config) = request.cache() else {
            return false;
        };
        if !config.accepts(response) {
            debug!(url = %request.url(), "response not eligible for caching");
            return false;
        }
        let Ok(ttl) = chrono::Duration::from_std(config.ttl()) else {
            return false;
        };

        let now = (self.clock)();
        let Some(expires_at) = now.checked_add_signed(ttl) else {
            return false;
        };
        let key = self.key(request, config).await;
        let metadata = CacheMetadata {
            app_version: self.app_version.clone(),
            created_at: now,
            expires_at,
            payload: response.raw().clone(),
        };

        let stored = self.storage.set(&key, metadata).await;
        if stored {
            debug!(url = %request.url(), %key, %expires_at, "cache save");
        } else {
            warn!(url = %request.url(), %key, "failed to write response to the cache");
        }
        stored
    }

    /// Whether a live entry exists for `request`.
    pub async fn exists(&self, request: &Request) -> bool {
        self.load(request).await.is_some()
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("app_version", &self.app_version)
            .finish_non_exhaustive()
    }
}
