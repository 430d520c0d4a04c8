//! Cache store adapter: string key/value store with per-key TTL.

pub mod in_memory;
pub mod keys;
pub mod product_cache;
pub mod redis;

pub use in_memory::InMemoryCacheStore;
pub use keys::CacheKey;
pub use product_cache::ProductCache;
pub use self::redis::{CacheStoreConfig, RedisCacheStore};

use std::time::Duration;

use async_trait::async_trait;
use larder_core::CacheError;

/// Result type alias for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Remaining lifetime of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists but never expires.
    Persistent,
    /// The key expires after this long.
    Expires(Duration),
}

impl KeyTtl {
    /// True when the key's lifetime is longer than `max`.
    ///
    /// A key with no expiry always exceeds the bound.
    pub fn exceeds(&self, max: Duration) -> bool {
        match self {
            KeyTtl::Missing => false,
            KeyTtl::Persistent => true,
            KeyTtl::Expires(remaining) => *remaining > max,
        }
    }

    pub fn is_live(&self) -> bool {
        match self {
            KeyTtl::Missing => false,
            KeyTtl::Persistent => true,
            KeyTtl::Expires(remaining) => !remaining.is_zero(),
        }
    }
}

/// Async key/value store with per-key expiry.
///
/// Values are opaque strings; [`ProductCache`] handles the JSON encoding.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a key unconditionally, replacing any existing value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Set a key only if it does not exist. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    async fn ttl_remaining(&self, key: &str) -> CacheResult<KeyTtl>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
