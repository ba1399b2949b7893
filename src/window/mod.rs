//! Sliding window log: one timestamp per admission, counted over a trailing window whose boundary
//! moves continuously with the clock.

use crate::backend::{HistoryStore, Timestamp};
use crate::clock::Clock;
use crate::event::{Event, EventKind};
use crate::locks::LockRegistry;
use crate::{Error, Result};
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Shortest wait reported for a key at its ceiling.
pub const MIN_WAIT_SECONDS: f64 = 0.001;

/// Longest accepted window, about 136 years. Waits derived from a window always fit a [Duration].
pub const MAX_WINDOW_SECONDS: f64 = u32::MAX as f64;

/// A ceiling for one tracked key: at most `max_admissions` within any `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    max_admissions: u64,
    window_seconds: f64,
}

impl WindowConfig {
    pub fn new(max_admissions: u64, window_seconds: f64) -> Result<Self> {
        if max_admissions == 0
            || !window_seconds.is_finite()
            || window_seconds <= 0.0
            || window_seconds > MAX_WINDOW_SECONDS
        {
            return Err(Error::InvalidWindow {
                max_admissions,
                window_seconds,
            });
        }
        Ok(Self {
            max_admissions,
            window_seconds,
        })
    }

    pub fn max_admissions(&self) -> u64 {
        self.max_admissions
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }
}

/// When history older than the window is removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrunePolicy {
    /// Prune only when a decision finds the key under its ceiling.
    ///
    /// A key that stays at its ceiling, or goes idle after a burst, keeps every timestamp it has
    /// ever recorded.
    #[default]
    OnAdmit,
    /// Prune on every decision for a configured key, whatever the outcome.
    Always,
}

/// Point in time usage of one tracked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Admissions within the current window.
    pub count: u64,
    /// Configured ceiling, 0 when the key is not configured.
    pub limit: u64,
}

impl Usage {
    /// Admissions still available in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// The sliding window engine.
///
/// Holds a [WindowConfig] per tracked key and answers, one key at a time, how long a caller must
/// wait before it may be admitted. Keys are opaque to the engine; keys without a configuration
/// are unlimited.
pub struct SlidingWindow<S> {
    store: S,
    limits: DashMap<String, WindowConfig>,
    locks: LockRegistry,
    clock: Clock,
    prune_policy: PrunePolicy,
}

impl<S: HistoryStore> SlidingWindow<S> {
    /// # Examples
    ///
    /// ```
    /// # use sliding_admission::backend::memory::InMemoryStore;
    /// # use sliding_admission::window::{PrunePolicy, SlidingWindow};
    /// let engine = SlidingWindow::builder(InMemoryStore::builder().build())
    ///     .prune_policy(PrunePolicy::Always)
    ///     .build();
    /// engine.configure("user:rps", 5, 1.0).unwrap();
    /// ```
    pub fn builder(store: S) -> SlidingWindowBuilder<S> {
        SlidingWindowBuilder {
            store,
            clock: Clock::new(),
            prune_policy: PrunePolicy::default(),
        }
    }

    /// Set (or silently replace) the ceiling for a key.
    ///
    /// Timestamps already recorded are kept and counted against the new window.
    pub fn configure(&self, key: &str, max_admissions: u64, window_seconds: f64) -> Result<()> {
        let limit = WindowConfig::new(max_admissions, window_seconds)?;
        self.limits.insert(key.to_owned(), limit);
        Event::new(EventKind::ConfigUpdated, key, self.store.kind())
            .limit(limit)
            .emit();
        Ok(())
    }

    /// Forget the ceiling for a key, making it unlimited. Its history is left in the store.
    pub fn remove(&self, key: &str) -> Option<WindowConfig> {
        self.limits.remove(key).map(|(_, limit)| limit)
    }

    pub fn limit(&self, key: &str) -> Option<WindowConfig> {
        self.limits.get(key).map(|l| *l)
    }

    pub fn is_configured(&self, key: &str) -> bool {
        self.limits.contains_key(key)
    }

    /// Seconds the caller must wait before being admitted against `key`, 0 if it may proceed now.
    ///
    /// Never sleeps, and never records anything. Only rate limited decisions emit a timing event,
    /// allowed ones are not timed.
    pub async fn decide(&self, key: &str) -> Result<f64> {
        let started = Instant::now();
        let limit = match self.limit(key) {
            Some(limit) => limit,
            None => return Ok(0f64),
        };
        let now = self.clock.now();
        let window_start = now - limit.window_seconds();

        let count = self.store.count_since(key, window_start).await?;
        if count < limit.max_admissions() {
            self.store.prune_before(key, window_start).await?;
            Event::new(EventKind::RequestAllowed, key, self.store.kind())
                .wait(0f64)
                .count(count)
                .emit();
            return Ok(0f64);
        }

        if self.prune_policy == PrunePolicy::Always {
            self.store.prune_before(key, window_start).await?;
        }
        // The window frees up once its oldest admission slides out
        let oldest = self
            .store
            .oldest_since(key, window_start, window_start)
            .await?;
        // An admission sitting exactly on the boundary still counts, so never report a zero wait
        // from this branch
        let wait = (oldest + limit.window_seconds() - now).max(MIN_WAIT_SECONDS);

        Event::new(EventKind::RateLimited, key, self.store.kind())
            .wait(wait)
            .count(count)
            .limit(limit)
            .with_dimension()
            .emit();
        Event::new(EventKind::TimedOperation, key, self.store.kind())
            .timed("decide", started.elapsed())
            .emit();
        Ok(wait)
    }

    /// Record an admission against `key` now.
    ///
    /// No check is made against the ceiling, callers are expected to have called
    /// [SlidingWindow::decide] (and waited) first. Does nothing for an unconfigured key.
    pub async fn record(&self, key: &str) -> Result<()> {
        self.record_at(key, self.clock.now()).await
    }

    pub async fn record_at(&self, key: &str, timestamp: Timestamp) -> Result<()> {
        if self.is_configured(key) {
            self.store.record(key, timestamp).await?;
        }
        Ok(())
    }

    /// Informational only, admission decisions never use this.
    pub async fn current_usage(&self, key: &str) -> Result<Usage> {
        let limit = match self.limit(key) {
            Some(limit) => limit,
            None => return Ok(Usage { count: 0, limit: 0 }),
        };
        let window_start = self.clock.now() - limit.window_seconds();
        let count = self.store.count_since(key, window_start).await?;
        Ok(Usage {
            count,
            limit: limit.max_admissions(),
        })
    }

    /// Admit against a single key if that is possible without waiting.
    ///
    /// Returns false, without recording anything, if the caller would have to wait.
    pub async fn try_admit(&self, key: &str) -> Result<bool> {
        let _guard = self.lock_key(key).await;
        if self.decide(key).await? > 0f64 {
            return Ok(false);
        }
        self.record(key).await?;
        Ok(true)
    }

    /// Wait until an admission against `key` is possible, then record it.
    ///
    /// The check is repeated after every wait, the key's lock is never held while sleeping.
    /// Returns the total time spent waiting.
    pub async fn admit(&self, key: &str) -> Result<Duration> {
        let mut waited = Duration::ZERO;
        loop {
            let guard = self.lock_key(key).await;
            let wait = self.decide(key).await?;
            if wait <= 0f64 {
                self.record(key).await?;
                return Ok(waited);
            }
            drop(guard);
            let wait = wait_duration(wait);
            actix_web::rt::time::sleep(wait).await;
            waited = waited.saturating_add(wait);
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn prune_policy(&self) -> PrunePolicy {
        self.prune_policy
    }

    pub(crate) async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    #[cfg(test)]
    pub(crate) fn key_lock_count(&self) -> usize {
        self.locks.len()
    }
}

// History written by another process, or through `record_at`, may lie in the future and stretch
// a wait past the window
pub(crate) fn wait_duration(wait: f64) -> Duration {
    Duration::try_from_secs_f64(wait.max(0f64)).unwrap_or(Duration::MAX)
}

pub struct SlidingWindowBuilder<S> {
    store: S,
    clock: Clock,
    prune_policy: PrunePolicy,
}

impl<S: HistoryStore> SlidingWindowBuilder<S> {
    /// Override the clock used for every timestamp and window boundary.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Default is [PrunePolicy::OnAdmit].
    pub fn prune_policy(mut self, prune_policy: PrunePolicy) -> Self {
        self.prune_policy = prune_policy;
        self
    }

    pub fn build(self) -> SlidingWindow<S> {
        SlidingWindow {
            store: self.store,
            limits: DashMap::new(),
            locks: LockRegistry::default(),
            clock: self.clock,
            prune_policy: self.prune_policy,
        }
    }
}
