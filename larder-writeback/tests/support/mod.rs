#![allow(dead_code)]

use std::sync::Arc;

use larder_core::WriteBackConfig;
use larder_storage::{InMemoryCacheStore, InMemoryRecordStore};
use larder_test_utils::fixtures;
use larder_writeback::{Flusher, ProductService, RetryForever, RetryPolicy};

pub type TestService = ProductService<InMemoryRecordStore, InMemoryCacheStore>;
pub type TestFlusher = Flusher<InMemoryRecordStore, InMemoryCacheStore>;

/// In-memory stores plus a service and flusher sharing one ledger.
pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub cache: Arc<InMemoryCacheStore>,
    pub service: TestService,
    pub flusher: TestFlusher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fixtures::test_config())
    }

    /// Rows `Product 1` to `Product {count}` already persisted.
    pub fn seeded(count: u32) -> Self {
        Self::build(
            fixtures::seeded_stores(count),
            fixtures::test_config(),
            RetryForever,
        )
    }

    pub fn with_config(config: WriteBackConfig) -> Self {
        Self::build(fixtures::stores(), config, RetryForever)
    }

    pub fn with_policy<P: RetryPolicy + 'static>(policy: P) -> Self {
        Self::build(fixtures::stores(), fixtures::test_config(), policy)
    }

    fn build<P: RetryPolicy + 'static>(
        (store, cache): (Arc<InMemoryRecordStore>, Arc<InMemoryCacheStore>),
        config: WriteBackConfig,
        policy: P,
    ) -> Self {
        let service = ProductService::new(Arc::clone(&store), Arc::clone(&cache), config);
        let flusher = service.flusher(policy);
        Self {
            store,
            cache,
            service,
            flusher,
        }
    }
}
