//! Flusher: drains the pending ledger into the record store.
//!
//! A cycle runs four steps in order: prune expired tombstones, then flush
//! inserts, updates and deletes. Every entry is handled on its own; a failed
//! store call leaves that entry queued (subject to the [`RetryPolicy`]) and
//! the cycle moves on. Cache errors are logged and never hold back the
//! completion of an entry whose store call succeeded, since retrying a
//! successful insert would duplicate the row.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use larder_core::{Product, ProductId, StoreError};
use larder_storage::{CacheKey, CacheStore, ProductCache, RecordStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::ledger::{PendingLedger, PendingQueue};
use crate::retry::{FlushOpKind, RetryDecision, RetryPolicy};
use crate::tombstone::TombstoneTracker;

// ============================================================================
// REPORT
// ============================================================================

/// A provisional id and the row id its insert was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub provisional: ProductId,
    pub persisted: ProductId,
}

/// A store operation that failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushFailure {
    pub kind: FlushOpKind,
    pub id: ProductId,
    pub reason: String,
    /// Failures of this entry so far, this one included.
    pub attempts: u32,
}

impl fmt::Display for FlushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed (attempt {}): {}",
            self.kind, self.id, self.attempts, self.reason
        )
    }
}

/// What one flush cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Deletes whose row was already gone.
    pub deletes_already_gone: usize,
    pub tombstones_pruned: usize,
    pub list_rewritten: bool,
    pub resolutions: Vec<Resolution>,
    /// Failed entries left queued for the next cycle.
    pub failures: Vec<FlushFailure>,
    /// Failed entries the retry policy gave up on.
    pub dead_lettered: Vec<FlushFailure>,
}

impl FlushReport {
    /// Row id the given provisional id was persisted as in this cycle.
    pub fn resolved(&self, provisional: ProductId) -> Option<ProductId> {
        self.resolutions
            .iter()
            .find(|r| r.provisional == provisional)
            .map(|r| r.persisted)
    }

    /// Number of ledger entries retired by this cycle.
    pub fn completed(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.deletes_already_gone
    }

    /// True when the cycle found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.completed() == 0
            && self.failures.is_empty()
            && self.dead_lettered.is_empty()
            && self.tombstones_pruned == 0
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters accumulated across every cycle of a flusher.
#[derive(Debug, Default)]
pub struct FlushMetrics {
    /// Total cycles completed
    pub cycles: AtomicU64,

    /// Pending inserts written to the store
    pub inserts_flushed: AtomicU64,

    /// Pending updates written to the store
    pub updates_flushed: AtomicU64,

    /// Pending deletes that removed a row
    pub deletes_flushed: AtomicU64,

    /// Pending deletes whose row was already gone
    pub deletes_noop: AtomicU64,

    /// Store operations that failed
    pub failures: AtomicU64,

    /// Entries abandoned by the retry policy
    pub dead_lettered: AtomicU64,

    /// Expired tombstones pruned
    pub tombstones_pruned: AtomicU64,
}

impl FlushMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> FlushMetricsSnapshot {
        FlushMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            inserts_flushed: self.inserts_flushed.load(Ordering::Relaxed),
            updates_flushed: self.updates_flushed.load(Ordering::Relaxed),
            deletes_flushed: self.deletes_flushed.load(Ordering::Relaxed),
            deletes_noop: self.deletes_noop.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            tombstones_pruned: self.tombstones_pruned.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &FlushReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.inserts_flushed
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.updates_flushed
            .fetch_add(report.updated as u64, Ordering::Relaxed);
        self.deletes_flushed
            .fetch_add(report.deleted as u64, Ordering::Relaxed);
        self.deletes_noop
            .fetch_add(report.deletes_already_gone as u64, Ordering::Relaxed);
        self.failures.fetch_add(
            (report.failures.len() + report.dead_lettered.len()) as u64,
            Ordering::Relaxed,
        );
        self.dead_lettered
            .fetch_add(report.dead_lettered.len() as u64, Ordering::Relaxed);
        self.tombstones_pruned
            .fetch_add(report.tombstones_pruned as u64, Ordering::Relaxed);
    }
}

/// Snapshot of flush metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushMetricsSnapshot {
    pub cycles: u64,
    pub inserts_flushed: u64,
    pub updates_flushed: u64,
    pub deletes_flushed: u64,
    pub deletes_noop: u64,
    pub failures: u64,
    pub dead_lettered: u64,
    pub tombstones_pruned: u64,
}

// ============================================================================
// FLUSHER
// ============================================================================

/// Drains a [`PendingLedger`] into a [`RecordStore`].
///
/// Clones share the ledger, metrics and cycle lock, so cycles never overlap
/// no matter which clone runs them.
pub struct Flusher<S, C> {
    store: Arc<S>,
    cache: ProductCache<C>,
    ledger: Arc<PendingLedger>,
    tombstones: Arc<TombstoneTracker>,
    policy: Arc<dyn RetryPolicy>,
    metrics: Arc<FlushMetrics>,
    cycle_lock: Arc<Mutex<()>>,
}

impl<S, C> Clone for Flusher<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            ledger: Arc::clone(&self.ledger),
            tombstones: Arc::clone(&self.tombstones),
            policy: Arc::clone(&self.policy),
            metrics: Arc::clone(&self.metrics),
            cycle_lock: Arc::clone(&self.cycle_lock),
        }
    }
}

impl<S, C> Flusher<S, C>
where
    S: RecordStore + 'static,
    C: CacheStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        cache: ProductCache<C>,
        ledger: Arc<PendingLedger>,
        tombstones: Arc<TombstoneTracker>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            store,
            cache,
            ledger,
            tombstones,
            policy,
            metrics: Arc::new(FlushMetrics::new()),
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn metrics(&self) -> &Arc<FlushMetrics> {
        &self.metrics
    }

    /// Entries still waiting in the ledger.
    pub fn pending(&self) -> usize {
        self.ledger.len()
    }

    /// Run one flush cycle. Waits for any cycle already in progress.
    pub async fn run_cycle(&self) -> FlushReport {
        let _cycle = self.cycle_lock.lock().await;

        let mut report = FlushReport {
            tombstones_pruned: self.tombstones.purge_expired(),
            ..FlushReport::default()
        };

        self.flush_inserts(&mut report).await;
        self.flush_updates(&mut report).await;
        self.flush_deletes(&mut report).await;

        self.metrics.record(&report);

        if report.is_idle() {
            trace!("Flush cycle completed with nothing pending");
        } else {
            info!(
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                deletes_already_gone = report.deletes_already_gone,
                failures = report.failures.len(),
                dead_lettered = report.dead_lettered.len(),
                tombstones_pruned = report.tombstones_pruned,
                still_pending = self.ledger.len(),
                "Flush cycle completed"
            );
        }

        report
    }

    async fn flush_inserts(&self, report: &mut FlushReport) {
        let pending = self.ledger.inserts.snapshot();
        if pending.is_empty() {
            return;
        }

        let mut snapshot = match self.cache.get_json::<Vec<Product>>(CacheKey::List).await {
            Ok(list) => list.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load list snapshot for flush");
                Vec::new()
            }
        };

        for (provisional, entry) in pending {
            let product = &entry.value;
            let provisional_id = ProductId::Provisional(provisional);

            let row_id = match self.store.insert(&product.fields(), product.created_at).await {
                Ok(row_id) => row_id,
                Err(e) => {
                    self.handle_failure(
                        FlushOpKind::Insert,
                        &self.ledger.inserts,
                        provisional,
                        provisional_id,
                        entry.seq,
                        &e,
                        report,
                    );
                    continue;
                }
            };

            // The row is durable, so the pending copy goes before any cache
            // await. Otherwise a read in between would see both.
            self.ledger.inserts.complete(&provisional, entry.seq);
            let persisted = product.with_id(ProductId::Persisted(row_id));

            if let Err(e) = self.cache.put(CacheKey::Item(persisted.id), &persisted).await {
                warn!(id = %persisted.id, error = %e, "Failed to cache flushed product");
            }
            if let Err(e) = self.cache.remove(CacheKey::Item(provisional_id)).await {
                warn!(id = %provisional_id, error = %e, "Failed to drop provisional cache entry");
            }
            for listed in snapshot.iter_mut().filter(|p| p.id == provisional_id) {
                listed.id = persisted.id;
            }

            report.inserted += 1;
            report.resolutions.push(Resolution {
                provisional: provisional_id,
                persisted: persisted.id,
            });

            debug!(provisional = %provisional_id, persisted = %persisted.id, "Insert flushed");
        }

        if report.inserted > 0 && !snapshot.is_empty() {
            match self.cache.put(CacheKey::List, &snapshot).await {
                Ok(()) => report.list_rewritten = true,
                Err(e) => warn!(error = %e, "Failed to rewrite list after flushing inserts"),
            }
        }
    }

    async fn flush_updates(&self, report: &mut FlushReport) {
        for (row_id, entry) in self.ledger.updates.snapshot() {
            let id = ProductId::Persisted(row_id);

            match self.store.update(row_id, &entry.value.fields()).await {
                Ok(affected) => {
                    if affected == 0 {
                        debug!(id = %id, "Update matched no row");
                    }
                    if !self.ledger.updates.complete(&row_id, entry.seq) {
                        debug!(id = %id, "Newer update queued during flush, keeping it");
                    }
                    report.updated += 1;
                }
                Err(e) => self.handle_failure(
                    FlushOpKind::Update,
                    &self.ledger.updates,
                    row_id,
                    id,
                    entry.seq,
                    &e,
                    report,
                ),
            }
        }
    }

    async fn flush_deletes(&self, report: &mut FlushReport) {
        for (row_id, entry) in self.ledger.deletes.snapshot() {
            let id = ProductId::Persisted(row_id);

            match self.store.delete(row_id).await {
                Ok(0) => {
                    debug!(id = %id, "Delete found no row, already gone");
                    self.ledger.deletes.complete(&row_id, entry.seq);
                    report.deletes_already_gone += 1;
                }
                Ok(_) => {
                    for key in [CacheKey::Item(id), CacheKey::List] {
                        if let Err(e) = self.cache.remove(key).await {
                            warn!(key = %key, error = %e, "Failed to clear cache after delete");
                        }
                    }
                    self.ledger.deletes.complete(&row_id, entry.seq);
                    report.deleted += 1;
                    debug!(id = %id, "Delete flushed");
                }
                Err(e) => self.handle_failure(
                    FlushOpKind::Delete,
                    &self.ledger.deletes,
                    row_id,
                    id,
                    entry.seq,
                    &e,
                    report,
                ),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_failure<K, V>(
        &self,
        kind: FlushOpKind,
        queue: &PendingQueue<K, V>,
        key: K,
        id: ProductId,
        seq: u64,
        err: &StoreError,
        report: &mut FlushReport,
    ) where
        K: Eq + Hash + Copy,
        V: Clone,
    {
        // None means a newer value replaced the entry mid-flight; it starts
        // over with its own attempt count.
        let Some(attempts) = queue.record_failure(&key, seq) else {
            error!(kind = %kind, id = %id, error = %err, "Flush failed for a superseded entry");
            report.failures.push(FlushFailure {
                kind,
                id,
                reason: err.to_string(),
                attempts: 1,
            });
            return;
        };

        let failure = FlushFailure {
            kind,
            id,
            reason: err.to_string(),
            attempts,
        };

        match self.policy.on_failure(kind, attempts) {
            RetryDecision::Retry => {
                error!(
                    kind = %kind,
                    id = %id,
                    attempts,
                    error = %err,
                    "Flush failed, entry stays queued"
                );
                report.failures.push(failure);
            }
            RetryDecision::DeadLetter => {
                queue.complete(&key, seq);
                error!(
                    kind = %kind,
                    id = %id,
                    attempts,
                    error = %err,
                    "Flush failed too many times, dropping entry"
                );
                report.dead_lettered.push(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_resolved_lookup() {
        let report = FlushReport {
            inserted: 1,
            resolutions: vec![Resolution {
                provisional: ProductId::Provisional(1_712_345_678_901),
                persisted: ProductId::Persisted(7),
            }],
            ..FlushReport::default()
        };
        assert_eq!(
            report.resolved(ProductId::Provisional(1_712_345_678_901)),
            Some(ProductId::Persisted(7))
        );
        assert_eq!(report.resolved(ProductId::Provisional(1)), None);
        assert!(!report.is_idle());
    }

    #[test]
    fn test_default_report_is_idle() {
        assert!(FlushReport::default().is_idle());
    }

    #[test]
    fn test_metrics_record_accumulates() {
        let metrics = FlushMetrics::new();
        let report = FlushReport {
            inserted: 2,
            deleted: 1,
            failures: vec![FlushFailure {
                kind: FlushOpKind::Update,
                id: ProductId::Persisted(3),
                reason: "boom".to_string(),
                attempts: 1,
            }],
            ..FlushReport::default()
        };
        metrics.record(&report);
        metrics.record(&FlushReport::default());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.inserts_flushed, 2);
        assert_eq!(snapshot.deletes_flushed, 1);
        assert_eq!(snapshot.failures, 1);
    }

    #[test]
    fn test_failure_display() {
        let failure = FlushFailure {
            kind: FlushOpKind::Delete,
            id: ProductId::Persisted(3),
            reason: "connection reset".to_string(),
            attempts: 2,
        };
        assert_eq!(
            failure.to_string(),
            "delete 3 failed (attempt 2): connection reset"
        );
    }
}
