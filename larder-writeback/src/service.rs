//! Product service: shared state behind the read path, write path and flusher.

use std::sync::Arc;

use larder_core::{LarderResult, Product, ProvisionalIdGenerator, WriteBackConfig};
use larder_storage::{CacheStore, ProductCache, RecordStore};
use serde::Serialize;
use tracing::{error, info};

use crate::flusher::Flusher;
use crate::ledger::PendingLedger;
use crate::retry::RetryPolicy;
use crate::tombstone::TombstoneTracker;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Whether the synchronous cache refresh of a write went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheStatus {
    /// Cache entries reflect the write.
    Synced,
    /// The write is accepted but readers may not see it until the next
    /// flush or cache expiry.
    Degraded { reason: String },
}

impl CacheStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, CacheStatus::Degraded { .. })
    }
}

/// Result of an accepted create. The product still carries its provisional id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOutcome {
    pub product: Product,
    pub cache: CacheStatus,
}

/// Result of an accepted update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub product: Product,
    pub cache: CacheStatus,
}

/// Result of an accepted delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Accepted,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Entry point for product reads and writes.
///
/// Writes are made visible through the cache and queued in the ledger; a
/// [`Flusher`] built with [`ProductService::flusher`] persists them later.
pub struct ProductService<S, C> {
    pub(crate) store: Arc<S>,
    pub(crate) cache: ProductCache<C>,
    pub(crate) ledger: Arc<PendingLedger>,
    pub(crate) tombstones: Arc<TombstoneTracker>,
    pub(crate) ids: Arc<ProvisionalIdGenerator>,
    pub(crate) config: WriteBackConfig,
}

impl<S, C> Clone for ProductService<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            ledger: Arc::clone(&self.ledger),
            tombstones: Arc::clone(&self.tombstones),
            ids: Arc::clone(&self.ids),
            config: self.config.clone(),
        }
    }
}

impl<S, C> ProductService<S, C>
where
    S: RecordStore + 'static,
    C: CacheStore + 'static,
{
    /// Build a service with an empty ledger and no tombstones.
    pub fn new(store: Arc<S>, cache_store: Arc<C>, config: WriteBackConfig) -> Self {
        Self::with_components(
            store,
            cache_store,
            Arc::new(PendingLedger::new()),
            Arc::new(TombstoneTracker::new()),
            config,
        )
    }

    /// Build a service around an existing ledger and tombstone tracker.
    pub fn with_components(
        store: Arc<S>,
        cache_store: Arc<C>,
        ledger: Arc<PendingLedger>,
        tombstones: Arc<TombstoneTracker>,
        config: WriteBackConfig,
    ) -> Self {
        let cache = ProductCache::new(cache_store, config.cache_max_ttl);
        Self {
            store,
            cache,
            ledger,
            tombstones,
            ids: Arc::new(ProvisionalIdGenerator::new()),
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<PendingLedger> {
        &self.ledger
    }

    pub fn tombstones(&self) -> &Arc<TombstoneTracker> {
        &self.tombstones
    }

    pub fn config(&self) -> &WriteBackConfig {
        &self.config
    }

    pub fn cache(&self) -> &ProductCache<C> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// A flusher draining this service's ledger.
    pub fn flusher<P: RetryPolicy + 'static>(&self, policy: P) -> Flusher<S, C> {
        Flusher::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            Arc::clone(&self.ledger),
            Arc::clone(&self.tombstones),
            Arc::new(policy),
        )
    }

    /// Check the record store is reachable and log its row count.
    ///
    /// An unreachable store is reported as `StoreUnavailable`.
    pub async fn startup_check(&self) -> LarderResult<i64> {
        match self.store.count().await {
            Ok(count) => {
                info!(
                    products = count,
                    cache_backend = self.cache.backend(),
                    cache_max_ttl_ms = self.config.cache_max_ttl.as_millis() as u64,
                    "Record store reachable"
                );
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "Record store check failed at startup");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_storage::{InMemoryCacheStore, InMemoryRecordStore};

    fn service() -> (
        Arc<InMemoryRecordStore>,
        ProductService<InMemoryRecordStore, InMemoryCacheStore>,
    ) {
        let store = Arc::new(InMemoryRecordStore::new());
        let service = ProductService::new(
            Arc::clone(&store),
            Arc::new(InMemoryCacheStore::new()),
            WriteBackConfig::default(),
        );
        (store, service)
    }

    #[tokio::test]
    async fn test_startup_check_reports_row_count() {
        let (store, service) = service();
        store.seed(larder_core::ProductFields::new("Widget", 1.0, ""));
        assert_eq!(service.startup_check().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_startup_check_fails_on_unreachable_store() {
        let (store, service) = service();
        store.set_available(false);
        let err = service.startup_check().await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_clones_share_ledger() {
        let (_, service) = service();
        let other = service.clone();
        other.ledger().deletes.enqueue(1, chrono::Utc::now());
        assert_eq!(service.ledger().len(), 1);
    }

    #[test]
    fn test_cache_status_serializes_with_tag() {
        let status = CacheStatus::Degraded {
            reason: "cache down".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reason"], "cache down");
    }
}
