//! Background eviction of expired window counters
//!
//! The sweeper only bounds memory. Admission never depends on it: a request
//! for an evicted key recreates the same fresh counter that reset-on-access
//! would have produced.

use crate::clock::Clock;
use crate::store::CounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Default sweep interval (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Called after each sweep with `(evicted, remaining)`.
pub type SweepObserver = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Periodically removes counters whose window has ended.
#[derive(Clone)]
pub struct EvictionSweeper {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    observer: Option<SweepObserver>,
}

impl EvictionSweeper {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: SweepObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run a single sweep now. Returns the number of counters removed.
    pub fn sweep_once(&self) -> usize {
        let evicted = self.store.evict_expired(self.clock.now());
        let remaining = self.store.len();
        if let Some(observer) = &self.observer {
            observer(evicted, remaining);
        }
        evicted
    }

    /// Start the sweep loop on the current tokio runtime.
    ///
    /// The loop runs until the handle is aborted or the runtime shuts down. A
    /// sweep that panics is logged and the next one runs on schedule.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Eviction sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let sweeper = self.clone();
            match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                Ok(evicted) => {
                    debug!(
                        evicted,
                        remaining = self.store.len(),
                        "Evicted expired rate limit counters"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Eviction sweep panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for EvictionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionSweeper")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Start an [`EvictionSweeper`] for `store`.
pub fn spawn_eviction_sweeper(
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    EvictionSweeper::new(store, clock, interval).spawn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryCounterStore, RateWindowCounter};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    /// Store whose first eviction panics
    struct FlakyStore {
        inner: InMemoryCounterStore,
        calls: AtomicUsize,
    }

    impl CounterStore for FlakyStore {
        fn hit(&self, key: &str, window_ms: u64, now: DateTime<Utc>) -> RateWindowCounter {
            self.inner.hit(key, window_ms, now)
        }

        fn lookup_or_create(
            &self,
            key: &str,
            window_ms: u64,
            now: DateTime<Utc>,
        ) -> RateWindowCounter {
            self.inner.lookup_or_create(key, window_ms, now)
        }

        fn commit(&self, key: &str, counter: RateWindowCounter) {
            self.inner.commit(key, counter)
        }

        fn evict_expired(&self, now: DateTime<Utc>) -> usize {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated sweep failure");
            }
            self.inner.evict_expired(now)
        }

        fn get(&self, key: &str) -> Option<RateWindowCounter> {
            self.inner.get(key)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[test]
    fn test_sweep_once_removes_expired() {
        let store = Arc::new(InMemoryCounterStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.hit("a", 60_000, t0());
        store.hit("b", 600_000, t0());

        let sweeper = EvictionSweeper::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        );
        assert_eq!(sweeper.sweep_once(), 0);

        clock.advance_ms(5 * 60_000);
        assert_eq!(sweeper.sweep_once(), 1);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }

    #[test]
    fn test_observer_sees_each_sweep() {
        let store = Arc::new(InMemoryCounterStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.hit("a", 1_000, t0());
        store.hit("b", 1_000_000, t0());
        clock.advance_ms(2_000);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_observer = Arc::clone(&seen);
        let sweeper = EvictionSweeper::new(store, clock, Duration::from_secs(1)).with_observer(
            Arc::new(move |evicted, remaining| {
                assert_eq!((evicted, remaining), (1, 1));
                seen_in_observer.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sweeper.sweep_once();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_periodically() {
        let store = Arc::new(InMemoryCounterStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        store.hit("a", 1_000, t0());
        clock.advance_ms(10_000);

        let handle = spawn_eviction_sweeper(store.clone(), clock, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_sweep_does_not_stop_loop() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryCounterStore::new(),
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(t0()));
        store.hit("a", 1_000, t0());
        clock.advance_ms(10_000);

        let handle = spawn_eviction_sweeper(store.clone(), clock, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_finished());
        handle.abort();

        assert!(store.calls.load(Ordering::SeqCst) >= 2);
        assert!(store.is_empty());
    }
}
