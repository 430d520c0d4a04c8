//! Typed product cache over a [`CacheStore`].

use std::sync::Arc;
use std::time::Duration;

use larder_core::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{CacheKey, CacheResult, CacheStore, KeyTtl};

/// JSON-encoded product entries with every write bounded by `max_ttl`.
pub struct ProductCache<C> {
    store: Arc<C>,
    max_ttl: Duration,
}

impl<C> Clone for ProductCache<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_ttl: self.max_ttl,
        }
    }
}

impl<C: CacheStore> ProductCache<C> {
    pub fn new(store: Arc<C>, max_ttl: Duration) -> Self {
        Self { store, max_ttl }
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    pub async fn ttl(&self, key: CacheKey) -> CacheResult<KeyTtl> {
        self.store.ttl_remaining(&key.to_string()).await
    }

    /// Purge `key` if its lifetime breaks the TTL bound.
    ///
    /// Returns the lifetime the key has afterwards, so a purged key reports
    /// [`KeyTtl::Missing`].
    pub async fn enforce_ttl_bound(&self, key: CacheKey) -> CacheResult<KeyTtl> {
        let ttl = self.ttl(key).await?;
        if !ttl.exceeds(self.max_ttl) {
            return Ok(ttl);
        }

        warn!(
            key = %key,
            ttl = ?ttl,
            max_ttl_ms = self.max_ttl.as_millis() as u64,
            "Cache entry outlives the TTL bound, purging"
        );
        self.remove(key).await?;
        Ok(KeyTtl::Missing)
    }

    /// Read and decode an entry.
    ///
    /// A value that does not decode is reported as
    /// [`CacheError::Serialization`] and left in place.
    pub async fn get_json<T: DeserializeOwned>(&self, key: CacheKey) -> CacheResult<Option<T>> {
        let Some(raw) = self.store.get(&key.to_string()).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Serialization {
                reason: format!("{}: {}", key, e),
            })
    }

    /// Write an entry with the maximum TTL, replacing whatever is there.
    pub async fn put<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) -> CacheResult<()> {
        let json = encode(value)?;
        self.store.set(&key.to_string(), &json, self.max_ttl).await
    }

    /// Write an entry with the maximum TTL unless the key already exists.
    pub async fn put_if_absent<T: Serialize + ?Sized>(
        &self,
        key: CacheKey,
        value: &T,
    ) -> CacheResult<bool> {
        let json = encode(value)?;
        self.store
            .set_if_absent(&key.to_string(), &json, self.max_ttl)
            .await
    }

    pub async fn remove(&self, key: CacheKey) -> CacheResult<bool> {
        self.store.delete(&key.to_string()).await
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}
