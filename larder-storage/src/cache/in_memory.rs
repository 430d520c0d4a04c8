//! In-memory cache store on the tokio clock.
//!
//! Expiry is measured with [`tokio::time::Instant`], so tests running with a
//! paused clock can step past TTLs with `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use larder_core::CacheError;
use tokio::time::Instant;

use super::{CacheResult, CacheStore, KeyTtl};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    drop_writes: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When false, every command fails with [`CacheError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Acknowledge writes without storing them, so read-back checks fail.
    pub fn drop_writes(&self, enabled: bool) {
        self.drop_writes.store(enabled, Ordering::SeqCst);
    }

    /// Store a value with an arbitrary lifetime, ignoring any TTL bound.
    ///
    /// `KeyTtl::Missing` removes the key.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: KeyTtl) {
        let expires_at = match ttl {
            KeyTtl::Missing => {
                self.lock().remove(key);
                return;
            }
            KeyTtl::Persistent => None,
            KeyTtl::Expires(d) => Some(Instant::now() + d),
        };
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock().get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable {
                reason: "in-memory cache marked unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Look up a live entry, dropping it if it has expired.
    fn live_entry(entries: &mut HashMap<String, Entry>, key: &str) -> Option<Entry> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        let mut entries = self.lock();
        Ok(Self::live_entry(&mut entries, key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_available()?;
        if self.drop_writes.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_available()?;
        let mut entries = self.lock();
        if Self::live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        if self.drop_writes.load(Ordering::SeqCst) {
            return Ok(true);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<KeyTtl> {
        self.check_available()?;
        let mut entries = self.lock();
        Ok(match Self::live_entry(&mut entries, key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        let mut entries = self.lock();
        let existed = Self::live_entry(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
