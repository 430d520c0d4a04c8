//! Retry policy for failed flush operations.

use serde::Serialize;
use std::fmt;

/// Which ledger queue a flush operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOpKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for FlushOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushOpKind::Insert => "insert",
            FlushOpKind::Update => "update",
            FlushOpKind::Delete => "delete",
        })
    }
}

/// What to do with a ledger entry after a failed store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the entry for the next cycle.
    Retry,
    /// Remove the entry; its mutation is abandoned.
    DeadLetter,
}

/// Decides whether a failing ledger entry stays queued.
///
/// `attempts` counts failures of the entry's current value, this one included.
pub trait RetryPolicy: Send + Sync {
    fn on_failure(&self, kind: FlushOpKind, attempts: u32) -> RetryDecision;
}

/// Keep every failed entry until it succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryForever;

impl RetryPolicy for RetryForever {
    fn on_failure(&self, _kind: FlushOpKind, _attempts: u32) -> RetryDecision {
        RetryDecision::Retry
    }
}

/// Abandon an entry once it has failed `max_attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetterAfter(pub u32);

impl RetryPolicy for DeadLetterAfter {
    fn on_failure(&self, _kind: FlushOpKind, attempts: u32) -> RetryDecision {
        if attempts >= self.0 {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry
        }
    }
}
