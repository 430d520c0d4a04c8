//! In-memory record store for tests and local runs.
//!
//! Ids are assigned sequentially from 1, the way a `BIGSERIAL` column would.
//! Failures can be injected per operation so callers can exercise the
//! retry and unavailable-store paths without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use larder_core::{Product, ProductFields, ProductId, StoreError, Timestamp};

use super::{RecordStore, StoreResult};

#[derive(Debug)]
pub struct InMemoryRecordStore {
    rows: RwLock<BTreeMap<i64, Product>>,
    next_id: AtomicI64,
    available: AtomicBool,
    insert_failures: AtomicUsize,
    update_failures: AtomicUsize,
    delete_failures: AtomicUsize,
    insert_calls: AtomicU64,
    update_calls: AtomicU64,
    delete_calls: AtomicU64,
    fetch_all_calls: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            insert_failures: AtomicUsize::new(0),
            update_failures: AtomicUsize::new(0),
            delete_failures: AtomicUsize::new(0),
            insert_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            fetch_all_calls: AtomicU64::new(0),
        }
    }

    /// Insert a row directly, bypassing availability and failure injection.
    pub fn seed(&self, fields: ProductFields) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let product = Product::from_fields(ProductId::Persisted(id), fields, Utc::now());
        self.write_rows().insert(id, product);
        id
    }

    /// When false, every operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `n` inserts fail with a query error.
    pub fn fail_inserts(&self, n: usize) {
        self.insert_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` updates fail with a query error.
    pub fn fail_updates(&self, n: usize) {
        self.update_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` deletes fail with a query error.
    pub fn fail_deletes(&self, n: usize) {
        self.delete_failures.store(n, Ordering::SeqCst);
    }

    /// Number of insert calls that reached the store, failed ones included.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_all_calls(&self) -> u64 {
        self.fetch_all_calls.load(Ordering::SeqCst)
    }

    /// Copy of every row, ordered by id.
    pub fn snapshot(&self) -> Vec<Product> {
        self.read_rows().values().cloned().collect()
    }

    pub fn get(&self, id: i64) -> Option<Product> {
        self.read_rows().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<i64, Product>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<i64, Product>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            })
        }
    }
}

/// Consume one injected failure, if any are left.
fn take_failure(counter: &AtomicUsize, op: &str) -> StoreResult<()> {
    let injected = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if injected {
        Err(StoreError::Query {
            reason: format!("injected {} failure", op),
        })
    } else {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_all(&self) -> StoreResult<Vec<Product>> {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.snapshot())
    }

    async fn fetch_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        self.check_available()?;
        Ok(self.get(id))
    }

    async fn insert(&self, fields: &ProductFields, created_at: Timestamp) -> StoreResult<i64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        take_failure(&self.insert_failures, "insert")?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let product = Product::from_fields(ProductId::Persisted(id), fields.clone(), created_at);
        self.write_rows().insert(id, product);
        Ok(id)
    }

    async fn update(&self, id: i64, fields: &ProductFields) -> StoreResult<u64> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        take_failure(&self.update_failures, "update")?;

        let mut rows = self.write_rows();
        match rows.get_mut(&id) {
            Some(row) => {
                *row = row.merged(fields.clone());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, id: i64) -> StoreResult<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        take_failure(&self.delete_failures, "delete")?;

        Ok(self.write_rows().remove(&id).map_or(0, |_| 1))
    }

    async fn count(&self) -> StoreResult<i64> {
        self.check_available()?;
        Ok(self.read_rows().len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> ProductFields {
        ProductFields::new("Widget", 9.99, "A widget")
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = InMemoryRecordStore::new();
        let a = store.insert(&widget(), Utc::now()).await.unwrap();
        let b = store.insert(&widget(), Utc::now()).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_is_ordered_by_id() {
        let store = InMemoryRecordStore::new();
        for name in ["c", "a", "b"] {
            store.seed(ProductFields::new(name, 1.0, ""));
        }
        let ids: Vec<_> = store
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                ProductId::Persisted(1),
                ProductId::Persisted(2),
                ProductId::Persisted(3)
            ]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let store = InMemoryRecordStore::new();
        let id = store.seed(widget());
        let before = store.get(id).unwrap();

        let affected = store
            .update(id, &ProductFields::new("Gadget", 4.5, ""))
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let after = store.get(id).unwrap();
        assert_eq!(after.name, "Gadget");
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn test_update_and_delete_of_missing_row_affect_nothing() {
        let store = InMemoryRecordStore::new();
        assert_eq!(store.update(99, &widget()).await.unwrap(), 0);
        assert_eq!(store.delete(99).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_twice_is_a_no_op_the_second_time() {
        let store = InMemoryRecordStore::new();
        let id = store.seed(widget());
        assert_eq!(store.delete(id).await.unwrap(), 1);
        assert_eq!(store.delete(id).await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryRecordStore::new();
        store.fail_inserts(1);

        let err = store.insert(&widget(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Query { .. }));
        assert!(store.is_empty());

        store.insert(&widget(), Utc::now()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryRecordStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable { .. })
        ));

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
