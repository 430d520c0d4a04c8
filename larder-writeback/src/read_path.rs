//! Read Path: `list` and `get_by_id`.
//!
//! The cache is preferred. The fallback is the record store with the
//! pending ledger laid over it, so accepted writes stay visible after their
//! cache entries expire and before they are flushed. Before a cached
//! entry is trusted its TTL is checked against the configured maximum, and an
//! entry that outlives the bound (or never expires) is purged and treated as
//! a miss. Tombstoned ids are filtered out of everything returned.
//!
//! Cache failures never reach the caller; they are logged and read as misses.

use larder_core::{CacheError, LarderError, LarderResult, Product, ProductId};
use larder_storage::{CacheKey, CacheStore, RecordStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::service::ProductService;

impl<S, C> ProductService<S, C>
where
    S: RecordStore + 'static,
    C: CacheStore + 'static,
{
    /// All products, minus any with a delete in flight.
    pub async fn list(&self) -> LarderResult<Vec<Product>> {
        if let Some(products) = self.read_cached::<Vec<Product>>(CacheKey::List).await {
            debug!(count = products.len(), "List served from cache");
            return Ok(self.without_tombstoned(products));
        }

        let products = self.with_pending(self.store.fetch_all().await?);
        debug!(count = products.len(), "List served from store");
        self.fill(CacheKey::List, &products).await;
        Ok(products)
    }

    /// A single product by id.
    ///
    /// Persisted ids fall back to the record store; provisional ids fall back
    /// to the pending inserts, since the store has never seen them. Tombstoned
    /// ids, unknown ids and provisional ids that have already been flushed
    /// are all `NotFound`.
    pub async fn get_by_id(&self, id: ProductId) -> LarderResult<Product> {
        if let ProductId::Persisted(row_id) = id {
            if self.tombstones.is_live(row_id) {
                debug!(id = %id, "Product has a delete in flight");
                return Err(LarderError::not_found(id));
            }
        }

        let key = CacheKey::Item(id);
        if let Some(product) = self.read_cached::<Product>(key).await {
            trace!(id = %id, "Product served from cache");
            return Ok(product);
        }

        let product = match id {
            ProductId::Persisted(row_id) => match self.ledger.updates.peek(&row_id) {
                Some(pending) => Some(pending),
                None => self.store.fetch_by_id(row_id).await?,
            },
            ProductId::Provisional(value) => self.ledger.inserts.peek(&value),
        };

        let Some(product) = product else {
            return Err(LarderError::not_found(id));
        };

        self.fill(key, &product).await;
        Ok(product)
    }

    /// Lay the ledger over rows read from the store: pending updates replace
    /// their rows, pending inserts are appended in creation order and
    /// tombstoned rows are dropped.
    ///
    /// A pending insert whose row the store already returned is skipped. The
    /// flusher can commit a row before it retires the ledger entry, and the
    /// store read may land in between.
    pub(crate) fn with_pending(&self, rows: Vec<Product>) -> Vec<Product> {
        let mut unmatched: Vec<&Product> = rows.iter().collect();
        let mut pending_inserts = Vec::new();
        for (_, pending) in self.ledger.inserts.snapshot() {
            match unmatched.iter().position(|row| same_record(row, &pending.value)) {
                Some(at) => {
                    trace!(id = %pending.value.id, "Pending insert already persisted");
                    unmatched.swap_remove(at);
                }
                None => pending_inserts.push(pending.value),
            }
        }

        let mut products: Vec<Product> = rows
            .into_iter()
            .map(|row| match row.id {
                ProductId::Persisted(row_id) => self.ledger.updates.peek(&row_id).unwrap_or(row),
                ProductId::Provisional(_) => row,
            })
            .collect();
        products.extend(pending_inserts);
        self.without_tombstoned(products)
    }

    pub(crate) fn without_tombstoned(&self, products: Vec<Product>) -> Vec<Product> {
        if self.tombstones.is_empty() {
            return products;
        }
        products
            .into_iter()
            .filter(|p| match p.id {
                ProductId::Persisted(row_id) => !self.tombstones.is_live(row_id),
                ProductId::Provisional(_) => true,
            })
            .collect()
    }

    /// Read a cache entry, enforcing the TTL bound first.
    async fn read_cached<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        match self.cache.enforce_ttl_bound(key).await {
            Ok(ttl) if ttl.is_live() => {}
            Ok(_) => {
                trace!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache TTL check failed, reading through");
                return None;
            }
        }

        match self.cache.get_json::<T>(key).await {
            Ok(value) => value,
            Err(e @ CacheError::Serialization { .. }) => {
                warn!(key = %key, error = %e, "Undecodable cache entry, purging");
                if let Err(e) = self.cache.remove(key).await {
                    warn!(key = %key, error = %e, "Failed to purge undecodable cache entry");
                }
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, reading through");
                None
            }
        }
    }

    /// Populate a cache entry unless another reader or writer got there first.
    async fn fill<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) {
        match self.cache.put_if_absent(key, value).await {
            Ok(true) => trace!(key = %key, "Cache populated"),
            Ok(false) => trace!(key = %key, "Cache already populated"),
            Err(e) => warn!(key = %key, error = %e, "Failed to populate cache"),
        }
    }
}

/// A persisted row that came from `pending`. Creation timestamps are kept at
/// microsecond precision, which the record store preserves.
fn same_record(row: &Product, pending: &Product) -> bool {
    !row.id.is_provisional() && row.created_at == pending.created_at && row.name == pending.name
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use larder_core::{ProductFields, WriteBackConfig};
    use larder_storage::{InMemoryCacheStore, InMemoryRecordStore, KeyTtl};

    use super::*;

    type Service = ProductService<InMemoryRecordStore, InMemoryCacheStore>;

    fn setup() -> (Arc<InMemoryRecordStore>, Arc<InMemoryCacheStore>, Service) {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let service = ProductService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            WriteBackConfig::default(),
        );
        (store, cache, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_miss_reads_store_and_fills_cache() {
        let (store, cache, service) = setup();
        store.seed(ProductFields::new("A", 1.0, ""));
        store.seed(ProductFields::new("B", 2.0, ""));

        let products = service.list().await.unwrap();
        assert_eq!(products.len(), 2);
        assert!(cache.contains("list"));

        // Second read is a hit.
        service.list().await.unwrap();
        assert_eq!(store.fetch_all_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_list_entry_is_purged_and_refilled() {
        let (store, cache, service) = setup();
        store.seed(ProductFields::new("Real", 1.0, ""));
        cache.insert_raw("list", "[]", KeyTtl::Persistent);

        let products = service.list().await.unwrap();
        assert_eq!(products.len(), 1);

        let ttl = cache.ttl_remaining("list").await.unwrap();
        assert!(!ttl.exceeds(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_by_id_unknown_is_not_found() {
        let (_, _, service) = setup();
        let err = service
            .get_by_id(ProductId::Persisted(404))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstoned_id_is_hidden_even_when_cached() {
        let (store, _, service) = setup();
        let id = store.seed(ProductFields::new("Doomed", 1.0, ""));

        service.get_by_id(ProductId::Persisted(id)).await.unwrap();
        service.list().await.unwrap();
        service.tombstones().mark(id, Duration::from_secs(3600));

        assert!(service
            .get_by_id(ProductId::Persisted(id))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_outage_reads_through_to_store() {
        let (store, cache, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        cache.set_available(false);

        let product = service.get_by_id(ProductId::Persisted(id)).await.unwrap();
        assert_eq!(product.name, "A");
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_item_is_purged() {
        let (store, cache, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        cache.insert_raw(
            &format!("item:{}", id),
            "{broken",
            KeyTtl::Expires(Duration::from_secs(2)),
        );

        let product = service.get_by_id(ProductId::Persisted(id)).await.unwrap();
        assert_eq!(product.name, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_on_miss_surfaces() {
        let (store, _, service) = setup();
        store.set_available(false);
        let err = service.list().await.unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
