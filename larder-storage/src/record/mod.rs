//! Record store adapter: CRUD against the durable relational store.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryRecordStore;
pub use postgres::{DbConfig, PgRecordStore};

use async_trait::async_trait;
use larder_core::{Product, ProductFields, StoreError, Timestamp};

/// Result type alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Async record store for product rows.
///
/// Ids here are always store-assigned row ids; provisional ids never reach
/// this layer. Implementations must report an unreachable store as
/// [`StoreError::Unavailable`] so startup can tell it apart from a bad query.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All rows, ordered by id.
    async fn fetch_all(&self) -> StoreResult<Vec<Product>>;

    /// A single row by id.
    async fn fetch_by_id(&self, id: i64) -> StoreResult<Option<Product>>;

    /// Insert a row and return the id the store assigned to it.
    async fn insert(&self, fields: &ProductFields, created_at: Timestamp) -> StoreResult<i64>;

    /// Overwrite the mutable fields of a row. Returns the affected row count.
    async fn update(&self, id: i64, fields: &ProductFields) -> StoreResult<u64>;

    /// Delete a row. Returns the affected row count; zero means it was already gone.
    async fn delete(&self, id: i64) -> StoreResult<u64>;

    /// Number of rows.
    async fn count(&self) -> StoreResult<i64>;

    /// Check that the store is reachable.
    async fn ping(&self) -> StoreResult<()> {
        self.count().await.map(|_| ())
    }
}
