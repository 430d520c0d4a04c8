//! Identity types for Larder products

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Smallest value a provisional id may take: the first 13-digit number.
///
/// Millisecond epoch timestamps have been 13 digits wide since 2001, so the
/// generator never produces anything below this even on a skewed clock.
pub const MIN_PROVISIONAL_ID: u64 = 1_000_000_000_000;

const PROVISIONAL_PREFIX: &str = "pending-";

/// Product identifier.
///
/// A product is addressed by a provisional id between `create` and the flush
/// that persists it, and by the store-assigned id afterwards. Keeping the two
/// in separate variants means a provisional id can never be mistaken for a
/// row id, whatever magnitude the store's sequence reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductId {
    /// Assigned by the relational store.
    Persisted(i64),
    /// Assigned at create time, valid until the flusher resolves it.
    Provisional(u64),
}

impl ProductId {
    /// Returns the store id, if this id has been persisted.
    pub fn persisted(&self) -> Option<i64> {
        match self {
            ProductId::Persisted(id) => Some(*id),
            ProductId::Provisional(_) => None,
        }
    }

    /// Returns the raw provisional value, if this id is provisional.
    pub fn provisional(&self) -> Option<u64> {
        match self {
            ProductId::Persisted(_) => None,
            ProductId::Provisional(id) => Some(*id),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, ProductId::Provisional(_))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductId::Persisted(id) => write!(f, "{}", id),
            ProductId::Provisional(id) => write!(f, "{}{}", PROVISIONAL_PREFIX, id),
        }
    }
}

/// Error returned when a product id string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid product id: {input}")]
pub struct ParseProductIdError {
    pub input: String,
}

impl FromStr for ProductId {
    type Err = ParseProductIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseProductIdError {
            input: s.to_string(),
        };

        if let Some(raw) = s.strip_prefix(PROVISIONAL_PREFIX) {
            return raw.parse::<u64>().map(ProductId::Provisional).map_err(|_| err());
        }

        s.parse::<i64>().map(ProductId::Persisted).map_err(|_| err())
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        ProductId::Persisted(id)
    }
}

/// Generator for provisional ids.
///
/// Ids are millisecond epoch timestamps, bumped by one whenever two creates
/// land in the same millisecond, so the sequence is strictly increasing for
/// the lifetime of the generator.
#[derive(Debug, Default)]
pub struct ProvisionalIdGenerator {
    last: AtomicU64,
}

impl ProvisionalIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next provisional id using the wall clock.
    pub fn next_id(&self) -> ProductId {
        ProductId::Provisional(self.next_value())
    }

    /// Allocate the next raw provisional value using the wall clock.
    pub fn next_value(&self) -> u64 {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.next_at(now_ms)
    }

    /// Allocate the next provisional value as if the clock read `now_ms`.
    pub fn next_at(&self, now_ms: u64) -> u64 {
        let floor = now_ms.max(MIN_PROVISIONAL_ID);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = floor.max(last.saturating_add(1));
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}
