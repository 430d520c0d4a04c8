//! Pending Operation Ledger
//!
//! Mutations accepted by the write path wait here until the flusher has
//! applied them to the record store. Each queue holds at most one entry per
//! key; enqueuing again replaces the value and bumps the entry's sequence
//! number.
//!
//! The flusher works from a snapshot and retires an entry with
//! [`PendingQueue::complete`], which only removes it if the sequence number
//! still matches. An update that lands while the previous value is being
//! written therefore survives for the next cycle.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use larder_core::{Product, Timestamp};

/// One pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<V> {
    /// Ledger-wide enqueue order.
    pub seq: u64,
    pub value: V,
    pub enqueued_at: Timestamp,
    /// Failed store attempts since this value was enqueued.
    pub attempts: u32,
}

/// Keyed collection of pending mutations.
#[derive(Debug)]
pub struct PendingQueue<K: Eq + Hash, V> {
    entries: DashMap<K, Pending<V>>,
    next_seq: AtomicU64,
}

impl<K: Eq + Hash, V> Default for PendingQueue<K, V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }
}

impl<K, V> PendingQueue<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `key`. Returns its sequence number.
    pub fn enqueue(&self, key: K, value: V) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            key,
            Pending {
                seq,
                value,
                enqueued_at: Utc::now(),
                attempts: 0,
            },
        );
        seq
    }

    /// Current value for `key`, if one is pending.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn get(&self, key: &K) -> Option<Pending<V>> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of every entry, oldest first.
    ///
    /// Entries stay in the queue until they are completed.
    pub fn snapshot(&self) -> Vec<(K, Pending<V>)> {
        let mut snapshot: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        snapshot.sort_by_key(|(_, pending)| pending.seq);
        snapshot
    }

    /// Remove the entry for `key` if it is still the one enqueued as `seq`.
    pub fn complete(&self, key: &K, seq: u64) -> bool {
        self.entries
            .remove_if(key, |_, pending| pending.seq == seq)
            .is_some()
    }

    /// Count a failed attempt against the entry enqueued as `seq`.
    ///
    /// Returns the new attempt count, or `None` if the entry was replaced or
    /// removed in the meantime.
    pub fn record_failure(&self, key: &K, seq: u64) -> Option<u32> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.seq != seq {
            return None;
        }
        entry.attempts = entry.attempts.saturating_add(1);
        Some(entry.attempts)
    }

    /// Remove the entry for `key` unconditionally.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, pending)| pending.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three queues of not-yet-persisted mutations.
#[derive(Debug, Default)]
pub struct PendingLedger {
    /// Provisional id to the product created under it.
    pub inserts: PendingQueue<u64, Product>,
    /// Row id to the full product as it should be written.
    pub updates: PendingQueue<i64, Product>,
    /// Row id to the time the delete was accepted.
    pub deletes: PendingQueue<i64, Timestamp>,
}

impl PendingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of pending entries across all queues.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_replaces_and_bumps_seq() {
        let queue: PendingQueue<i64, &str> = PendingQueue::new();
        let first = queue.enqueue(1, "a");
        let second = queue.enqueue(1, "b");

        assert!(second > first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek(&1), Some("b"));
    }

    #[test]
    fn test_complete_with_stale_seq_keeps_newer_value() {
        let queue: PendingQueue<i64, &str> = PendingQueue::new();
        let stale = queue.enqueue(7, "old");
        let fresh = queue.enqueue(7, "new");

        assert!(!queue.complete(&7, stale));
        assert_eq!(queue.peek(&7), Some("new"));

        assert!(queue.complete(&7, fresh));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_entries_in_enqueue_order() {
        let queue: PendingQueue<u64, u32> = PendingQueue::new();
        queue.enqueue(30, 3);
        queue.enqueue(10, 1);
        queue.enqueue(20, 2);

        let keys: Vec<u64> = queue.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![30, 10, 20]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_record_failure_counts_attempts() {
        let queue: PendingQueue<i64, ()> = PendingQueue::new();
        let seq = queue.enqueue(1, ());
        assert_eq!(queue.record_failure(&1, seq), Some(1));
        assert_eq!(queue.record_failure(&1, seq), Some(2));

        // A fresh value starts over.
        let seq = queue.enqueue(1, ());
        assert_eq!(queue.get(&1).map(|p| p.attempts), Some(0));
        assert_eq!(queue.record_failure(&1, seq - 1), None);
    }

    #[test]
    fn test_ledger_len_spans_all_queues() {
        let ledger = PendingLedger::new();
        assert!(ledger.is_empty());
        ledger.deletes.enqueue(1, Utc::now());
        ledger.deletes.enqueue(2, Utc::now());
        assert_eq!(ledger.len(), 2);
    }
}
