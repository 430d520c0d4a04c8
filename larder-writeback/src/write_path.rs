//! Write Path: `create`, `update` and `delete`.
//!
//! Each write refreshes the cache synchronously so the caller's next read
//! sees it, then queues the durable mutation in the ledger. A cache failure
//! downgrades the outcome to [`CacheStatus::Degraded`] but never rejects
//! the write.

use chrono::{SubsecRound, Utc};
use larder_core::{
    CacheError, LarderError, LarderResult, Product, ProductFields, ProductId,
};
use larder_storage::{CacheKey, CacheStore, RecordStore};
use tracing::{debug, warn};

use crate::service::{CacheStatus, CreateOutcome, DeleteOutcome, ProductService, UpdateOutcome};

impl<S, C> ProductService<S, C>
where
    S: RecordStore + 'static,
    C: CacheStore + 'static,
{
    /// Accept a new product under a fresh provisional id.
    pub async fn create(&self, fields: ProductFields) -> CreateOutcome {
        let provisional = self.ids.next_value();
        let product = Product::from_fields(
            ProductId::Provisional(provisional),
            fields,
            Utc::now().trunc_subsecs(6),
        );

        let cache = degrade_on_error(&product.id, "create", self.publish_created(&product).await);
        self.ledger.inserts.enqueue(provisional, product.clone());

        debug!(
            id = %product.id,
            pending_inserts = self.ledger.inserts.len(),
            degraded = cache.is_degraded(),
            "Create accepted"
        );
        CreateOutcome { product, cache }
    }

    /// Replace the mutable fields of an existing product.
    ///
    /// Only persisted ids can be updated. Existence is checked against the
    /// record store, never the cache.
    pub async fn update(&self, id: ProductId, fields: ProductFields) -> LarderResult<UpdateOutcome> {
        let row_id = match id {
            ProductId::Persisted(row_id) if !self.tombstones.is_live(row_id) => row_id,
            _ => return Err(LarderError::not_found(id)),
        };
        let Some(current) = self.store.fetch_by_id(row_id).await? else {
            return Err(LarderError::not_found(id));
        };

        let product = current.merged(fields);
        let cache = degrade_on_error(&id, "update", self.publish_updated(&product).await);
        self.ledger.updates.enqueue(row_id, product.clone());

        debug!(
            id = %id,
            pending_updates = self.ledger.updates.len(),
            degraded = cache.is_degraded(),
            "Update accepted"
        );
        Ok(UpdateOutcome { product, cache })
    }

    /// Accept a delete: tombstone the id, drop its cache entries and queue it.
    ///
    /// Deleting again while the first delete is still queued is accepted and
    /// refreshes the tombstone.
    pub async fn delete(&self, id: ProductId) -> LarderResult<DeleteOutcome> {
        let ProductId::Persisted(row_id) = id else {
            return Err(LarderError::not_found(id));
        };

        if !self.ledger.deletes.contains(&row_id)
            && self.store.fetch_by_id(row_id).await?.is_none()
        {
            return Err(LarderError::not_found(id));
        }

        self.tombstones.mark(row_id, self.config.tombstone_window);

        for key in [CacheKey::Item(id), CacheKey::List] {
            if let Err(e) = self.cache.remove(key).await {
                warn!(key = %key, error = %e, "Failed to drop cache entry for delete");
            }
        }

        self.ledger.deletes.enqueue(row_id, Utc::now());

        debug!(
            id = %id,
            pending_deletes = self.ledger.deletes.len(),
            "Delete accepted"
        );
        Ok(DeleteOutcome::Accepted)
    }

    /// Write the new product and a fresh list, then read both back.
    async fn publish_created(&self, product: &Product) -> LarderResult<()> {
        let mut products = self.with_pending(self.store.fetch_all().await?);
        products.push(product.clone());

        let item = CacheKey::Item(product.id);
        self.cache.put(CacheKey::List, &products).await?;
        self.cache.put(item, product).await?;

        let listed = self
            .cache
            .get_json::<Vec<Product>>(CacheKey::List)
            .await?
            .is_some_and(|list| list.iter().any(|p| p.id == product.id));
        if !listed {
            return Err(verification_failed(CacheKey::List));
        }
        if self.cache.get_json::<Product>(item).await?.is_none() {
            return Err(verification_failed(item));
        }
        Ok(())
    }

    /// Swap the updated product into the cached list and rewrite its item.
    async fn publish_updated(&self, product: &Product) -> LarderResult<()> {
        let cached = self.cache.get_json::<Vec<Product>>(CacheKey::List).await?;

        let products = match cached {
            Some(mut list) if list.iter().any(|p| p.id == product.id) => {
                for entry in list.iter_mut().filter(|p| p.id == product.id) {
                    *entry = product.clone();
                }
                list
            }
            _ => {
                let mut list = self.with_pending(self.store.fetch_all().await?);
                for entry in list.iter_mut().filter(|p| p.id == product.id) {
                    *entry = product.clone();
                }
                list
            }
        };

        self.cache.put(CacheKey::List, &products).await?;
        self.cache.put(CacheKey::Item(product.id), product).await?;
        Ok(())
    }
}

fn verification_failed(key: CacheKey) -> LarderError {
    LarderError::Cache(CacheError::VerificationFailed {
        key: key.to_string(),
    })
}

fn degrade_on_error(id: &ProductId, op: &str, result: LarderResult<()>) -> CacheStatus {
    match result {
        Ok(()) => CacheStatus::Synced,
        Err(e) => {
            warn!(id = %id, op, error = %e, "Cache refresh failed, write accepted without it");
            CacheStatus::Degraded {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use larder_core::WriteBackConfig;
    use larder_storage::{InMemoryCacheStore, InMemoryRecordStore};

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
    async fn test_create_is_visible_before_flush() {
        let (store, cache, service) = setup();
        let outcome = service
            .create(ProductFields::new("Widget", 9.99, "A widget"))
            .await;

        assert_eq!(outcome.cache, CacheStatus::Synced);
        assert!(outcome.product.id.is_provisional());
        assert!(store.is_empty());
        assert!(cache.contains(&format!("item:{}", outcome.product.id)));

        let listed = service.list().await.unwrap();
        assert!(listed.iter().any(|p| p.id == outcome.product.id));
        assert_eq!(
            service.get_by_id(outcome.product.id).await.unwrap(),
            outcome.product
        );
        assert_eq!(service.ledger().inserts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_degrades_when_store_reread_fails() {
        let (store, _, service) = setup();
        store.set_available(false);

        let outcome = service.create(ProductFields::new("Widget", 1.0, "")).await;
        assert!(outcome.cache.is_degraded());
        assert_eq!(service.ledger().inserts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_degrades_when_verification_fails() {
        let (_, cache, service) = setup();
        cache.drop_writes(true);

        let outcome = service.create(ProductFields::new("Widget", 1.0, "")).await;
        match outcome.cache {
            CacheStatus::Degraded { reason } => assert!(reason.contains("verification")),
            CacheStatus::Synced => panic!("expected degraded cache status"),
        }
        assert_eq!(service.ledger().inserts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_provisional_id_is_not_found() {
        let (_, _, service) = setup();
        let created = service.create(ProductFields::new("Widget", 1.0, "")).await;

        let err = service
            .update(created.product.id, ProductFields::new("X", 2.0, ""))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(service.ledger().updates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_replaces_element_in_cached_list() {
        let (store, _, service) = setup();
        let a = store.seed(ProductFields::new("A", 1.0, ""));
        store.seed(ProductFields::new("B", 2.0, ""));
        service.list().await.unwrap();

        let outcome = service
            .update(ProductId::Persisted(a), ProductFields::new("A2", 1.5, "new"))
            .await
            .unwrap();
        assert_eq!(outcome.cache, CacheStatus::Synced);
        assert_eq!(
            outcome.product.created_at,
            store.get(a).unwrap().created_at
        );

        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "A2");
        assert_eq!(store.get(a).unwrap().name, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_tombstoned_id_is_not_found() {
        let (store, _, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        service.delete(ProductId::Persisted(id)).await.unwrap();

        let err = service
            .update(ProductId::Persisted(id), ProductFields::new("B", 1.0, ""))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_hides_product_immediately() {
        let (store, cache, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        service.get_by_id(ProductId::Persisted(id)).await.unwrap();
        service.list().await.unwrap();

        let outcome = service.delete(ProductId::Persisted(id)).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Accepted);
        assert!(!cache.contains(&format!("item:{}", id)));
        assert!(!cache.contains("list"));

        assert!(service
            .get_by_id(ProductId::Persisted(id))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service.list().await.unwrap().is_empty());
        assert!(store.get(id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_again_while_pending_refreshes_tombstone() {
        let (store, _, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        service.delete(ProductId::Persisted(id)).await.unwrap();
        let first = service.tombstones().get(id).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        service.delete(ProductId::Persisted(id)).await.unwrap();
        let second = service.tombstones().get(id).unwrap();

        assert!(second.expires_at > first.expires_at);
        assert_eq!(service.ledger().deletes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_of_missing_or_provisional_id_is_not_found() {
        let (_, _, service) = setup();
        assert!(service
            .delete(ProductId::Persisted(9))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service
            .delete(ProductId::Provisional(1_712_345_678_901))
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service.tombstones().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_cache_down_is_still_accepted() {
        let (store, cache, service) = setup();
        let id = store.seed(ProductFields::new("A", 1.0, ""));
        cache.set_available(false);

        service.delete(ProductId::Persisted(id)).await.unwrap();
        assert_eq!(service.ledger().deletes.len(), 1);
    }
}
