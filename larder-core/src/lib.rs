//! Larder Core - Entity Types
//!
//! Pure data structures shared by every other crate in the workspace: the
//! product model, the typed id space, the error taxonomy and configuration.
//! No I/O lives here.

pub mod config;
pub mod error;
pub mod identity;
pub mod product;

pub use config::{
    WriteBackConfig, DEFAULT_CACHE_MAX_TTL_SECS, DEFAULT_FLUSH_INTERVAL_SECS,
    DEFAULT_FLUSH_ON_SHUTDOWN, DEFAULT_TOMBSTONE_WINDOW_SECS,
};
pub use error::{CacheError, ConfigError, LarderError, LarderResult, StoreError};
pub use identity::{
    ParseProductIdError, ProductId, ProvisionalIdGenerator, Timestamp, MIN_PROVISIONAL_ID,
};
pub use product::{Product, ProductFields};
