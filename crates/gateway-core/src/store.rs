//! Fixed-window counter storage
//!
//! Counters are keyed by `"{identity}:{path}"` and carry the request count for
//! the current window plus the instant that window ends. They are created on a
//! key's first request, reset in place when a request arrives after the window
//! has ended, and only physically removed by the eviction sweeper.
//!
//! ## Atomicity
//!
//! [`CounterStore::hit`] is the lookup, reset, increment and commit sequence
//! as one step. The in-memory store runs it under the DashMap entry guard, so
//! two concurrent requests for the same key can never both read `count = N`.
//! Unrelated keys only contend when they hash to the same shard.
//!
//! ## Scope
//!
//! State is process-local. Several instances behind a load balancer each
//! enforce the full limit independently. A shared store would implement
//! [`CounterStore`].

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Request count for one `(identity, path)` key in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowCounter {
    pub count: u64,
    pub window_reset_at: DateTime<Utc>,
}

impl RateWindowCounter {
    /// A counter for a window starting at `now`.
    pub fn fresh(now: DateTime<Utc>, window_ms: u64) -> Self {
        let window = Duration::milliseconds(i64::try_from(window_ms).unwrap_or(i64::MAX));
        Self {
            count: 0,
            window_reset_at: now
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Strictly past the reset instant; the reset instant itself still belongs
    /// to the old window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }
}

/// Build the store key for a caller and request path.
pub fn composite_key(identity: &str, path: &str) -> String {
    format!("{}:{}", identity, path)
}

/// Storage for window counters.
///
/// Implementations must make [`hit`](CounterStore::hit) atomic per key.
pub trait CounterStore: Send + Sync {
    /// Count one request against `key` and return the updated counter.
    ///
    /// Creates the counter if absent and starts a new window if the current
    /// one has expired.
    fn hit(&self, key: &str, window_ms: u64, now: DateTime<Utc>) -> RateWindowCounter;

    /// The counter a request arriving at `now` counts against, without
    /// counting anything.
    ///
    /// Inserts a fresh counter on the key's first request and restarts an
    /// expired window in place.
    fn lookup_or_create(&self, key: &str, window_ms: u64, now: DateTime<Utc>)
        -> RateWindowCounter;

    /// Replace the stored counter for `key`.
    fn commit(&self, key: &str, counter: RateWindowCounter);

    /// Remove every counter whose window ended before `now`. Returns how many
    /// were removed.
    fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    fn get(&self, key: &str) -> Option<RateWindowCounter>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// DashMap-backed [`CounterStore`] for single-instance deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, RateWindowCounter>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn hit(&self, key: &str, window_ms: u64, now: DateTime<Utc>) -> RateWindowCounter {
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| RateWindowCounter::fresh(now, window_ms));

        if counter.is_expired(now) {
            *counter = RateWindowCounter::fresh(now, window_ms);
        }

        counter.count = counter.count.saturating_add(1);
        *counter
    }

    fn lookup_or_create(
        &self,
        key: &str,
        window_ms: u64,
        now: DateTime<Utc>,
    ) -> RateWindowCounter {
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| RateWindowCounter::fresh(now, window_ms));

        if counter.is_expired(now) {
            *counter = RateWindowCounter::fresh(now, window_ms);
        }
        *counter
    }

    fn commit(&self, key: &str, counter: RateWindowCounter) {
        self.counters.insert(key.to_string(), counter);
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| counter.window_reset_at >= now);
        before.saturating_sub(self.counters.len())
    }

    fn get(&self, key: &str) -> Option<RateWindowCounter> {
        self.counters.get(key).map(|counter| *counter)
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_first_hit_creates_counter() {
        let store = InMemoryCounterStore::new();
        let counter = store.hit("ip-anonymous:/api/x", 60_000, t0());

        assert_eq!(counter.count, 1);
        assert_eq!(counter.window_reset_at, t0() + Duration::milliseconds(60_000));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_hits_accumulate_within_window() {
        let store = InMemoryCounterStore::new();
        for expected in 1..=7 {
            let counter = store.hit("k", 60_000, t0() + Duration::seconds(expected));
            assert_eq!(counter.count, expected as u64);
            // Window started with the first hit at t0 + 1s
            assert_eq!(counter.window_reset_at, t0() + Duration::seconds(61));
        }
    }

    #[test]
    fn test_reset_instant_belongs_to_old_window() {
        let store = InMemoryCounterStore::new();
        store.hit("k", 1_000, t0());

        let at_boundary = store.hit("k", 1_000, t0() + Duration::milliseconds(1_000));
        assert_eq!(at_boundary.count, 2);

        let past_boundary = store.hit("k", 1_000, t0() + Duration::milliseconds(1_001));
        assert_eq!(past_boundary.count, 1);
        assert_eq!(
            past_boundary.window_reset_at,
            t0() + Duration::milliseconds(2_001)
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let store = InMemoryCounterStore::new();
        store.hit("a", 60_000, t0());
        store.hit("a", 60_000, t0());
        let b = store.hit("b", 60_000, t0());

        assert_eq!(b.count, 1);
        assert_eq!(store.get("a").unwrap().count, 2);
    }

    #[test]
    fn test_lookup_or_create_inserts_without_counting() {
        let store = InMemoryCounterStore::new();
        let fresh = store.lookup_or_create("k", 60_000, t0());
        assert_eq!(fresh.count, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(fresh));

        let mut counter = fresh;
        counter.count += 1;
        store.commit("k", counter);
        assert_eq!(store.lookup_or_create("k", 60_000, t0()).count, 1);

        // An expired window is restarted in place
        let later = t0() + Duration::seconds(61);
        let restarted = store.lookup_or_create("k", 60_000, later);
        assert_eq!(restarted.count, 0);
        assert_eq!(restarted.window_reset_at, later + Duration::seconds(60));
        assert_eq!(store.get("k"), Some(restarted));
    }

    #[test]
    fn test_lookup_then_commit_matches_hit() {
        let split = InMemoryCounterStore::new();
        let mut counter = split.lookup_or_create("k", 60_000, t0());
        counter.count += 1;
        split.commit("k", counter);

        let combined = InMemoryCounterStore::new();
        assert_eq!(combined.hit("k", 60_000, t0()), split.get("k").unwrap());
    }

    #[test]
    fn test_evict_expired_only_removes_elapsed_windows() {
        let store = InMemoryCounterStore::new();
        store.hit("short", 1_000, t0());
        store.hit("long", 60_000, t0());

        // Exactly at the reset instant nothing is removed
        assert_eq!(store.evict_expired(t0() + Duration::milliseconds(1_000)), 0);

        assert_eq!(store.evict_expired(t0() + Duration::seconds(2)), 1);
        assert!(store.get("short").is_none());
        assert!(store.get("long").is_some());
    }

    #[test]
    fn test_recreated_counter_matches_first_request() {
        let store = InMemoryCounterStore::new();
        let evicted_store = InMemoryCounterStore::new();
        for _ in 0..10 {
            store.hit("k", 1_000, t0());
            evicted_store.hit("k", 1_000, t0());
        }

        let later = t0() + Duration::seconds(5);
        evicted_store.evict_expired(later);
        assert!(evicted_store.is_empty());

        assert_eq!(store.hit("k", 1_000, later), evicted_store.hit("k", 1_000, later));
    }

    #[test]
    fn test_huge_window_saturates() {
        let counter = RateWindowCounter::fresh(t0(), u64::MAX);
        assert_eq!(counter.window_reset_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_concurrent_hits_are_not_lost() {
        let store = InMemoryCounterStore::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        store.hit("shared", 60_000, t0());
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        assert_eq!(store.get("shared").unwrap().count, 4_000);
    }

    #[test]
    fn test_composite_key() {
        assert_eq!(
            composite_key("ip-anonymous", "/api/quick-scan"),
            "ip-anonymous:/api/quick-scan"
        );
    }
}
