//! Larder Write-Back Engine
//!
//! A product catalogue served from a TTL-bounded cache, with writes made
//! durable asynchronously:
//!
//! - [`ProductService`] serves reads (`list`, `get_by_id`) cache-first and
//!   accepts writes (`create`, `update`, `delete`) by refreshing the cache
//!   and queueing the mutation in the [`PendingLedger`].
//! - [`TombstoneTracker`] hides ids whose delete is still in flight.
//! - [`Flusher`] drains the ledger into the record store; [`jobs::flush_task`]
//!   runs it on a fixed interval.
//!
//! Consistency between the record store and the cache is eventual, bounded
//! by the flush interval plus store latency.

pub mod flusher;
pub mod jobs;
pub mod ledger;
pub mod read_path;
pub mod retry;
pub mod service;
pub mod telemetry;
pub mod tombstone;
pub mod write_path;

pub use flusher::{FlushFailure, FlushMetrics, FlushMetricsSnapshot, FlushReport, Flusher, Resolution};
pub use jobs::flush_task;
pub use ledger::{Pending, PendingLedger, PendingQueue};
pub use retry::{DeadLetterAfter, FlushOpKind, RetryDecision, RetryForever, RetryPolicy};
pub use service::{CacheStatus, CreateOutcome, DeleteOutcome, ProductService, UpdateOutcome};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
pub use tombstone::{Tombstone, TombstoneTracker};
