use crate::backend::{HistoryStore, Timestamp};
use crate::clock::Clock;
use crate::Result;
use actix_web::rt::time::Instant;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Longest of the built in dimension windows (one hour).
pub const DEFAULT_GC_RETENTION_SECONDS: u64 = 60 * 60;

/// A [HistoryStore] that keeps a sorted list of timestamps per key in a
/// [Dashmap](dashmap::DashMap).
///
/// Every operation on a key runs while holding that key's shard lock, so callers never observe a
/// partially applied insert or prune. Counting and pruning locate the window boundary with a
/// binary search.
///
/// History is kept for the lifetime of the store unless the garbage collector is enabled, see
/// [InMemoryStoreBuilder::with_gc_interval].
#[derive(Clone)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, Vec<Timestamp>>>,
    gc_handle: Option<Arc<JoinHandle<()>>>,
}

impl InMemoryStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder {
            gc_interval: None,
            gc_retention: Duration::from_secs(DEFAULT_GC_RETENTION_SECONDS),
            clock: Clock::new(),
        }
    }

    /// Total number of timestamps held for a key, including those outside any window.
    pub fn history_len(&self, key: &str) -> usize {
        self.map.get(key).map(|v| v.len()).unwrap_or(0)
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    fn garbage_collector(
        map: Arc<DashMap<String, Vec<Timestamp>>>,
        interval: Duration,
        retention: Duration,
        clock: Clock,
    ) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        tokio::spawn(async move {
            loop {
                let now = Instant::now();
                let cutoff = clock.now() - retention.as_secs_f64();
                // Keys whose newest admission fell out of the retention period are idle
                map.retain(|_k, v| v.last().map_or(false, |newest| *newest >= cutoff));
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

// Index of the first timestamp >= window_start
fn window_boundary(timestamps: &[Timestamp], window_start: Timestamp) -> usize {
    timestamps.partition_point(|t| *t < window_start)
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn record(&self, key: &str, timestamp: Timestamp) -> Result<()> {
        let mut timestamps = self.map.entry(key.to_owned()).or_default();
        let index = timestamps.partition_point(|t| *t <= timestamp);
        timestamps.insert(index, timestamp);
        Ok(())
    }

    async fn count_since(&self, key: &str, window_start: Timestamp) -> Result<u64> {
        Ok(self
            .map
            .get(key)
            .map(|v| (v.len() - window_boundary(&v, window_start)) as u64)
            .unwrap_or(0))
    }

    async fn prune_before(&self, key: &str, window_start: Timestamp) -> Result<()> {
        if let Some(mut timestamps) = self.map.get_mut(key) {
            let index = window_boundary(&timestamps, window_start);
            if index > 0 {
                timestamps.drain(..index);
            }
        }
        Ok(())
    }

    async fn oldest_since(
        &self,
        key: &str,
        window_start: Timestamp,
        default: Timestamp,
    ) -> Result<Timestamp> {
        Ok(self
            .map
            .get(key)
            .and_then(|v| v.get(window_boundary(&v, window_start)).copied())
            .unwrap_or(default))
    }

    async fn remove_key(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        // Only the last clone stops the collector
        if let Some(handle) = &self.gc_handle {
            if Arc::strong_count(handle) == 1 {
                handle.abort();
            }
        }
    }
}

pub struct InMemoryStoreBuilder {
    gc_interval: Option<Duration>,
    gc_retention: Duration,
    clock: Clock,
}

impl InMemoryStoreBuilder {
    /// Enable the garbage collector, which periodically removes keys that have seen no admission
    /// within the retention period.
    ///
    /// Default is None (disabled): history for a key that stays at its ceiling, or goes idle after
    /// a burst, is otherwise retained indefinitely.
    ///
    /// The collector is spawned onto the current tokio runtime when [InMemoryStoreBuilder::build]
    /// is called.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    /// How long a key may go without an admission before the garbage collector drops it.
    ///
    /// This should be at least as long as the longest window configured against the store.
    /// Defaults to one hour.
    pub fn with_gc_retention(mut self, retention: Duration) -> Self {
        self.gc_retention = retention;
        self
    }

    /// Clock used by the garbage collector to judge idleness.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> InMemoryStore {
        let map = Arc::new(DashMap::<String, Vec<Timestamp>>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(InMemoryStore::garbage_collector(
                map.clone(),
                gc_interval,
                self.gc_retention,
                self.clock,
            ))
        });
        InMemoryStore { map, gc_handle }
    }
}
