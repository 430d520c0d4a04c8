//! Cache key families.

use larder_core::ProductId;
use std::fmt;

const LIST_KEY: &str = "list";
const ITEM_PREFIX: &str = "item:";

/// A key in one of the two product key families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Snapshot of the whole product collection.
    List,
    /// A single product, persisted or provisional.
    Item(ProductId),
}

impl CacheKey {
    pub fn item(id: impl Into<ProductId>) -> Self {
        CacheKey::Item(id.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::List => f.write_str(LIST_KEY),
            CacheKey::Item(id) => write!(f, "{}{}", ITEM_PREFIX, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(CacheKey::List.to_string(), "list");
        assert_eq!(CacheKey::item(42).to_string(), "item:42");
        assert_eq!(
            CacheKey::Item(ProductId::Provisional(1_712_345_678_901)).to_string(),
            "item:pending-1712345678901"
        );
    }

    #[test]
    fn test_provisional_and_persisted_keys_never_collide() {
        let n = 1_712_345_678_901u64;
        assert_ne!(
            CacheKey::Item(ProductId::Provisional(n)).to_string(),
            CacheKey::item(n as i64).to_string()
        );
    }
}
