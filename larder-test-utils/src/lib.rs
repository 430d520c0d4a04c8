//! Larder Test Utilities
//!
//! Shared test infrastructure for the Larder workspace:
//! - Proptest generators for products and ids
//! - Fixtures wiring in-memory record and cache stores
//! - Assertions for read-path visibility

pub use larder_core::{
    LarderError, LarderResult, Product, ProductFields, ProductId, Timestamp, WriteBackConfig,
    MIN_PROVISIONAL_ID,
};
pub use larder_storage::{InMemoryCacheStore, InMemoryRecordStore, KeyTtl};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Larder types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a product name.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,31}"
    }

    /// Generate a price with two decimal places, as the store keeps it.
    pub fn arb_price() -> impl Strategy<Value = f64> {
        (0u32..10_000_000).prop_map(|cents| f64::from(cents) / 100.0)
    }

    pub fn arb_product_fields() -> impl Strategy<Value = ProductFields> {
        (arb_name(), arb_price(), "[a-z ]{0,64}")
            .prop_map(|(name, price, description)| ProductFields::new(name, price, description))
    }

    /// Generate a persisted id as a BIGSERIAL column would assign it.
    pub fn arb_persisted_id() -> impl Strategy<Value = ProductId> {
        (1i64..1_000_000).prop_map(ProductId::Persisted)
    }

    /// Generate a provisional id (13 digits or more).
    pub fn arb_provisional_id() -> impl Strategy<Value = ProductId> {
        (MIN_PROVISIONAL_ID..MIN_PROVISIONAL_ID * 10).prop_map(ProductId::Provisional)
    }

    pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
        prop_oneof![arb_persisted_id(), arb_provisional_id()]
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_product() -> impl Strategy<Value = Product> {
        (arb_product_id(), arb_product_fields(), arb_timestamp())
            .prop_map(|(id, fields, created_at)| Product::from_fields(id, fields, created_at))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common test scenarios.

    use super::*;

    /// Fields for a generic product.
    pub fn widget() -> ProductFields {
        ProductFields::new("Widget", 9.99, "A standard widget")
    }

    /// Fields for a numbered product, handy when a test needs several.
    pub fn numbered(n: u32) -> ProductFields {
        ProductFields::new(format!("Product {}", n), f64::from(n) + 0.5, "")
    }

    /// Default configuration, with the tombstone window shortened for tests
    /// that need to outlive it.
    pub fn test_config() -> WriteBackConfig {
        WriteBackConfig::default().with_tombstone_window(Duration::from_secs(120))
    }

    /// Empty in-memory record and cache stores.
    pub fn stores() -> (Arc<InMemoryRecordStore>, Arc<InMemoryCacheStore>) {
        (
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryCacheStore::new()),
        )
    }

    /// In-memory stores with `count` rows already persisted.
    pub fn seeded_stores(count: u32) -> (Arc<InMemoryRecordStore>, Arc<InMemoryCacheStore>) {
        let (store, cache) = stores();
        for n in 1..=count {
            store.seed(numbered(n));
        }
        (store, cache)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Larder read results.

    use super::*;

    /// Assert that a result is `NotFound`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &LarderResult<T>) {
        assert!(
            matches!(result, Err(LarderError::NotFound { .. })),
            "Expected NotFound, got {:?}",
            result
        );
    }

    /// Assert that `id` appears in a product list.
    #[track_caller]
    pub fn assert_listed(products: &[Product], id: ProductId) {
        assert!(
            products.iter().any(|p| p.id == id),
            "Expected {} in list, got {:?}",
            id,
            products.iter().map(|p| p.id).collect::<Vec<_>>()
        );
    }

    /// Assert that `id` does not appear in a product list.
    #[track_caller]
    pub fn assert_not_listed(products: &[Product], id: ProductId) {
        assert!(
            products.iter().all(|p| p.id != id),
            "Expected {} absent from list",
            id
        );
    }

    /// Assert that a cache TTL respects the bound.
    #[track_caller]
    pub fn assert_ttl_bounded(ttl: KeyTtl, max: Duration) {
        assert!(
            !ttl.exceeds(max),
            "Cache TTL {:?} exceeds the {:?} bound",
            ttl,
            max
        );
    }
}
