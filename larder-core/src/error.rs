//! Error types for Larder operations

use crate::identity::ProductId;
use thiserror::Error;

/// Record store (relational database) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached: pool exhausted, connection refused or closed.
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store query failed: {reason}")]
    Query { reason: String },

    #[error("Failed to decode row: {reason}")]
    Decode { reason: String },
}

/// Cache store errors.
///
/// None of these ever reach a read or write path caller; they are logged and
/// downgraded to a cache miss or a degraded-cache annotation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache command failed: {reason}")]
    Command { reason: String },

    #[error("Cache value serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache verification failed for key {key}")]
    VerificationFailed { key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Larder errors.
#[derive(Debug, Clone, Error)]
pub enum LarderError {
    /// The product does not exist, or a delete for it is in flight.
    #[error("Product not found: {id}")]
    NotFound { id: ProductId },

    #[error("Store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LarderError {
    pub fn not_found(id: impl Into<ProductId>) -> Self {
        LarderError::NotFound { id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LarderError::NotFound { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LarderError::StoreUnavailable { .. })
    }
}

impl From<StoreError> for LarderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { reason } => LarderError::StoreUnavailable { reason },
            other => LarderError::Store(other),
        }
    }
}

/// Result type alias for Larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_includes_id() {
        let err = LarderError::not_found(ProductId::Provisional(1_712_345_678_901));
        let msg = format!("{}", err);
        assert!(msg.contains("Product not found"));
        assert!(msg.contains("pending-1712345678901"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_store_unavailable_is_distinguishable() {
        let err = LarderError::from(StoreError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert!(err.is_store_unavailable());

        let err = LarderError::from(StoreError::Query {
            reason: "syntax error".to_string(),
        });
        assert!(matches!(err, LarderError::Store(StoreError::Query { .. })));
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_cache_error_display_verification() {
        let err = CacheError::VerificationFailed {
            key: "list".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("verification failed"));
        assert!(msg.contains("list"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "LARDER_FLUSH_INTERVAL_SECS".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("LARDER_FLUSH_INTERVAL_SECS"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_larder_error_from_variants() {
        let cache = LarderError::from(CacheError::Unavailable {
            reason: "down".to_string(),
        });
        assert!(matches!(cache, LarderError::Cache(_)));

        let config = LarderError::from(ConfigError::InvalidValue {
            field: "f".to_string(),
            value: "v".to_string(),
            reason: "r".to_string(),
        });
        assert!(matches!(config, LarderError::Config(_)));
    }
}
