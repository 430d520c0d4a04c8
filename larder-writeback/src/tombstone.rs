//! Tombstone Tracker
//!
//! A tombstone marks a row id whose delete has been accepted but may not have
//! reached the record store yet. Readers treat a tombstoned id as gone even if
//! the store, or a cache entry written before the delete, still has it.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use larder_core::Timestamp;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub pending_since: Timestamp,
    pub expires_at: Instant,
}

impl Tombstone {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Row ids with a delete in flight, each expiring after its safety window.
///
/// Expiry runs on the tokio clock.
#[derive(Debug, Default)]
pub struct TombstoneTracker {
    entries: DashMap<i64, Tombstone>,
}

impl TombstoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tombstone `id` for `window`, replacing any earlier tombstone.
    pub fn mark(&self, id: i64, window: Duration) -> Tombstone {
        let tombstone = Tombstone {
            pending_since: Utc::now(),
            expires_at: Instant::now() + window,
        };
        self.entries.insert(id, tombstone);
        tombstone
    }

    /// Whether `id` has an unexpired tombstone. Expired ones are dropped.
    pub fn is_live(&self, id: i64) -> bool {
        let now = Instant::now();
        match self.entries.get(&id).map(|t| t.is_live(now)) {
            Some(true) => true,
            Some(false) => {
                self.entries.remove_if(&id, |_, t| !t.is_live(now));
                false
            }
            None => false,
        }
    }

    pub fn get(&self, id: i64) -> Option<Tombstone> {
        self.entries.get(&id).map(|t| *t)
    }

    pub fn clear(&self, id: i64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Drop every expired tombstone. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, t| t.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked tombstones, expired ones not yet purged included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_tombstone_expires_after_window() {
        let tracker = TombstoneTracker::new();
        tracker.mark(5, WINDOW);
        assert!(tracker.is_live(5));

        tokio::time::advance(WINDOW - Duration::from_secs(1)).await;
        assert!(tracker.is_live(5));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!tracker.is_live(5));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_again_refreshes_window() {
        let tracker = TombstoneTracker::new();
        tracker.mark(5, WINDOW);
        tokio::time::advance(Duration::from_secs(3000)).await;

        tracker.mark(5, WINDOW);
        tokio::time::advance(Duration::from_secs(1000)).await;
        assert!(tracker.is_live(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_keeps_live_tombstones() {
        let tracker = TombstoneTracker::new();
        tracker.mark(1, Duration::from_secs(10));
        tracker.mark(2, WINDOW);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(tracker.purge_expired(), 1);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.is_live(2));
    }

    #[test]
    fn test_clear() {
        let tracker = TombstoneTracker::new();
        assert!(!tracker.clear(1));
        tracker.mark(1, WINDOW);
        assert!(tracker.clear(1));
        assert!(!tracker.is_live(1));
    }
}
