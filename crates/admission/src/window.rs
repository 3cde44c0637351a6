//! Per-principal sliding window of request timestamps.
//!
//! The window is a pure data structure: every operation takes explicit
//! timestamps, so the arithmetic is directly testable. The limiter owns
//! the clock.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Bounded record of request start times plus the in-flight count.
///
/// Timestamps are appended in nondecreasing order (the limiter always
/// stamps with "now"). Entries older than 24 h may be evicted at any
/// time; counts over retained entries are exact.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    /// Request ids started but not yet completed.
    live: HashSet<Uuid>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request start.
    pub fn add(&mut self, timestamp: DateTime<Utc>, request_id: Uuid) {
        self.timestamps.push_back(timestamp);
        self.live.insert(request_id);
    }

    /// Mark a request complete. Unknown ids are tolerated silently, so
    /// double-completion cannot drive the in-flight count negative.
    pub fn complete(&mut self, request_id: &Uuid) -> bool {
        self.live.remove(request_id)
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> u32 {
        self.live.len() as u32
    }

    /// Exact count of retained timestamps at or after `since`.
    pub fn count_since(&self, since: DateTime<Utc>) -> u32 {
        // Timestamps are ordered, so scan from the newest end.
        self.timestamps
            .iter()
            .rev()
            .take_while(|ts| **ts >= since)
            .count() as u32
    }

    /// Drop timestamps strictly older than `cutoff`.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while matches!(self.timestamps.front(), Some(ts) if *ts < cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Retained timestamp count (for invariant checks).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn id() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn counts_are_exact_per_horizon() {
        let now = Utc::now();
        let mut window = SlidingWindow::new();
        window.add(now - Duration::hours(25), id());
        window.add(now - Duration::hours(2), id());
        window.add(now - Duration::minutes(30), id());
        window.add(now - Duration::seconds(10), id());

        assert_eq!(window.count_since(now - Duration::seconds(60)), 1);
        assert_eq!(window.count_since(now - Duration::hours(1)), 2);
        assert_eq!(window.count_since(now - Duration::hours(24)), 3);
    }

    #[test]
    fn eviction_preserves_subwindow_counts() {
        let now = Utc::now();
        let mut window = SlidingWindow::new();
        window.add(now - Duration::hours(30), id());
        window.add(now - Duration::hours(25), id());
        window.add(now - Duration::minutes(5), id());

        window.evict_before(now - Duration::hours(24));

        assert_eq!(window.len(), 1);
        assert_eq!(window.count_since(now - Duration::hours(24)), 1);
        assert_eq!(window.count_since(now - Duration::seconds(60)), 0);
    }

    #[test]
    fn timestamps_older_than_a_minute_leave_the_minute_window() {
        // The time-travel half of the per-minute cap: a timestamp from
        // 61 seconds ago no longer counts against the minute horizon.
        let now = Utc::now();
        let mut window = SlidingWindow::new();
        for _ in 0..3 {
            window.add(now - Duration::seconds(61), id());
        }
        assert_eq!(window.count_since(now - Duration::seconds(60)), 0);
        assert_eq!(window.count_since(now - Duration::hours(1)), 3);
    }

    #[test]
    fn in_flight_tracks_live_ids() {
        let mut window = SlidingWindow::new();
        let a = id();
        let b = id();
        window.add(Utc::now(), a);
        window.add(Utc::now(), b);
        assert_eq!(window.in_flight(), 2);

        assert!(window.complete(&a));
        assert_eq!(window.in_flight(), 1);

        // Double completion is a no-op.
        assert!(!window.complete(&a));
        assert_eq!(window.in_flight(), 1);

        // Unknown id is a no-op.
        assert!(!window.complete(&id()));
        assert_eq!(window.in_flight(), 1);

        assert!(window.complete(&b));
        assert_eq!(window.in_flight(), 0);
    }

    #[test]
    fn eviction_does_not_touch_in_flight() {
        let now = Utc::now();
        let mut window = SlidingWindow::new();
        let a = id();
        window.add(now - chrono::Duration::hours(30), a);
        window.evict_before(now - chrono::Duration::hours(24));
        assert!(window.is_empty());
        assert_eq!(window.in_flight(), 1);
    }
}
