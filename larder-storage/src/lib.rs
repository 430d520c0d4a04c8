//! Larder Storage - Record Store and Cache Store Adapters
//!
//! Two external collaborators sit behind the traits in this crate:
//!
//! - [`RecordStore`]: the authoritative relational store. [`PgRecordStore`]
//!   talks to PostgreSQL through a deadpool connection pool;
//!   [`InMemoryRecordStore`] backs tests.
//! - [`CacheStore`]: a string key/value store with per-key TTL.
//!   [`RedisCacheStore`] is the production backend; [`InMemoryCacheStore`]
//!   runs on the tokio clock so tests can pause and advance time.
//!
//! [`ProductCache`] layers JSON (de)serialization and the two key families
//! (`item:{id}` and `list`) over any cache store.

pub mod cache;
pub mod record;

pub use cache::{
    CacheKey, CacheResult, CacheStore, CacheStoreConfig, InMemoryCacheStore, KeyTtl,
    ProductCache, RedisCacheStore,
};
pub use record::{DbConfig, InMemoryRecordStore, PgRecordStore, RecordStore, StoreResult};
