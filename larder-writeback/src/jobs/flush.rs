//! Scheduled flush task.
//!
//! Runs [`Flusher::run_cycle`] every `flush_interval` until the shutdown
//! signal flips to `true` or its sender is dropped. The first cycle runs one
//! full interval after start. A cycle that overruns the interval delays the
//! next tick instead of queueing extra ones.

use std::sync::Arc;

use larder_core::WriteBackConfig;
use larder_storage::{CacheStore, RecordStore};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::flusher::{FlushMetrics, Flusher};

/// Background task that flushes the ledger on a fixed interval.
///
/// When `config.flush_on_shutdown` is set, one last cycle runs after the
/// shutdown signal so accepted writes are not left in memory.
///
/// # Returns
///
/// Metrics collected over the flusher's lifetime
pub async fn flush_task<S, C>(
    flusher: Flusher<S, C>,
    config: WriteBackConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<FlushMetrics>
where
    S: RecordStore + 'static,
    C: CacheStore + 'static,
{
    let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        flush_interval_secs = config.flush_interval.as_secs(),
        flush_on_shutdown = config.flush_on_shutdown,
        "Flush task started"
    );

    if !*shutdown_rx.borrow_and_update() {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Flush task shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    flusher.run_cycle().await;
                }
            }
        }
    }

    if config.flush_on_shutdown {
        let report = flusher.run_cycle().await;
        tracing::info!(
            completed = report.completed(),
            failures = report.failures.len(),
            "Final flush cycle completed"
        );
    }

    let pending = flusher.pending();
    if pending > 0 {
        tracing::warn!(pending, "Flush task stopped with entries still pending");
    }

    let metrics = Arc::clone(flusher.metrics());
    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        inserts_flushed = snapshot.inserts_flushed,
        updates_flushed = snapshot.updates_flushed,
        deletes_flushed = snapshot.deletes_flushed,
        failures = snapshot.failures,
        "Flush task completed"
    );

    metrics
}
