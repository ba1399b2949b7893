//! Combines the ceilings configured on a resource into a single admission decision.

mod dimension;
mod guard;

pub use dimension::{Ceilings, Dimension, RequestKind};
pub use guard::AdmissionGuard;

use crate::backend::HistoryStore;
use crate::locks::LockRegistry;
use crate::window::{wait_duration, SlidingWindow, Usage, WindowConfig};
use crate::Result;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// How concurrent admissions against the same resource are serialised.
///
/// In both cases a lock covers the decision and the recording that follows it, and is released
/// before any wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockStrategy {
    /// One lock per resource identity.
    #[default]
    PerResource,
    /// One lock per tracked key (the engine's own key locks), taken for every active dimension in
    /// [Dimension] order. Locks are created on first use and never released.
    PerKey,
}

/// Read only snapshot of a resource, for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
    pub resource: String,
    pub configuration: Ceilings,
    /// Absent if it could not be computed.
    pub current_wait_requests: Option<f64>,
    /// Absent if it could not be computed.
    pub current_wait_tokens: Option<f64>,
    /// Usage of each configured dimension that could be read.
    pub current_usage: BTreeMap<Dimension, Usage>,
}

/// The multi-dimension coordinator.
///
/// Owns, per resource identity, the set of dimensions that were configured for it and allocates
/// their tracked keys (`<resource>:<suffix>`). A decision is the longest wait of any active
/// dimension; an admission is recorded into every active dimension of the requested kind.
pub struct Coordinator<S> {
    engine: SlidingWindow<S>,
    resources: DashMap<String, Ceilings>,
    resource_locks: LockRegistry,
    lock_strategy: LockStrategy,
}

impl<S: HistoryStore> Coordinator<S> {
    pub fn builder(engine: SlidingWindow<S>) -> CoordinatorBuilder<S> {
        CoordinatorBuilder {
            engine,
            lock_strategy: LockStrategy::default(),
        }
    }

    /// Configure the ceilings of a resource, replacing any earlier configuration.
    ///
    /// The new ceilings replace the old ones rather than merging with them: dimensions left out
    /// are no longer enforced, although their history stays in the store. Nothing changes if the
    /// ceilings are rejected.
    pub fn configure_resource(&self, resource: &str, ceilings: Ceilings) -> Result<()> {
        let windows = ceilings.windows()?;
        for dimension in Dimension::ALL {
            let key = dimension.key(resource);
            match windows.iter().find(|(d, _)| *d == dimension) {
                Some((_, limit)) => {
                    self.engine
                        .configure(&key, limit.max_admissions(), limit.window_seconds())?;
                }
                None => {
                    self.engine.remove(&key);
                }
            }
        }
        self.resources.insert(resource.to_owned(), ceilings);
        Ok(())
    }

    /// Set only the custom dimension of a resource, keeping its other ceilings.
    pub fn configure_custom(
        &self,
        resource: &str,
        max_admissions: u64,
        window_seconds: f64,
    ) -> Result<()> {
        let limit = WindowConfig::new(max_admissions, window_seconds)?;
        let ceilings = self.ceilings(resource).unwrap_or_default().custom(limit);
        self.configure_resource(resource, ceilings)
    }

    pub fn is_configured(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    pub fn ceilings(&self, resource: &str) -> Option<Ceilings> {
        self.resources.get(resource).map(|c| c.clone())
    }

    /// Longest wait across the resource's active dimensions for `kind`, 0 if it may proceed now.
    ///
    /// Unconfigured resources are unlimited.
    pub async fn decide(&self, resource: &str, kind: RequestKind) -> Result<f64> {
        let keys = self.active_keys(resource, kind);
        self.decide_keys(&keys).await
    }

    /// Wait until the resource admits a caller of `kind`, then record the admission in every
    /// active dimension.
    ///
    /// The decision is repeated after each wait, so callers woken together cannot push the
    /// resource past a ceiling. The returned guard's drop does nothing.
    pub async fn admit(&self, resource: &str, kind: RequestKind) -> Result<AdmissionGuard> {
        let keys = self.active_keys(resource, kind);
        let mut waited = Duration::ZERO;
        loop {
            let locks = self.lock(resource, &keys).await;
            let wait = self.decide_keys(&keys).await?;
            if wait <= 0f64 {
                let admitted_at = self.record_keys(&keys).await?;
                return Ok(AdmissionGuard {
                    resource: resource.to_owned(),
                    kind,
                    waited,
                    admitted_at,
                });
            }
            drop(locks);
            log::debug!("Delaying admission to {resource} ({kind}) by {wait:.3}s");
            let wait = wait_duration(wait);
            actix_web::rt::time::sleep(wait).await;
            waited = waited.saturating_add(wait);
        }
    }

    /// Admit, then run `work`.
    ///
    /// The admission is recorded before `work` starts and stays recorded if it fails.
    pub async fn run<F, T>(&self, resource: &str, kind: RequestKind, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _guard = self.admit(resource, kind).await?;
        Ok(work.await)
    }

    /// Admit only if that is possible without waiting.
    ///
    /// Returns false, without recording anything in any dimension, if any dimension would make
    /// the caller wait.
    pub async fn try_admit(&self, resource: &str, kind: RequestKind) -> Result<bool> {
        let keys = self.active_keys(resource, kind);
        let _locks = self.lock(resource, &keys).await;
        if self.decide_keys(&keys).await? > 0f64 {
            return Ok(false);
        }
        self.record_keys(&keys).await?;
        Ok(true)
    }

    /// Best effort snapshot, fields that fail to compute are left out.
    pub async fn status(&self, resource: &str) -> Option<ResourceStatus> {
        let configuration = self.ceilings(resource)?;

        let current_wait_requests = self
            .decide(resource, RequestKind::Requests)
            .await
            .map_err(|e| log::warn!("Unable to compute request wait for {resource}: {e}"))
            .ok();
        let current_wait_tokens = self
            .decide(resource, RequestKind::Tokens)
            .await
            .map_err(|e| log::warn!("Unable to compute token wait for {resource}: {e}"))
            .ok();

        let mut current_usage = BTreeMap::new();
        for dimension in Dimension::ALL {
            if !configuration.contains(dimension) {
                continue;
            }
            match self.engine.current_usage(&dimension.key(resource)).await {
                Ok(usage) => {
                    current_usage.insert(dimension, usage);
                }
                Err(e) => log::warn!("Unable to read {dimension} usage for {resource}: {e}"),
            }
        }

        Some(ResourceStatus {
            resource: resource.to_owned(),
            configuration,
            current_wait_requests,
            current_wait_tokens,
            current_usage,
        })
    }

    /// Usage of one dimension of a resource.
    pub async fn current_usage(&self, resource: &str, dimension: Dimension) -> Result<Usage> {
        self.engine.current_usage(&dimension.key(resource)).await
    }

    /// The active dimension of `kind` with the fewest admissions left, [None] if the resource has
    /// no ceiling for that kind.
    pub async fn tightest_usage(
        &self,
        resource: &str,
        kind: RequestKind,
    ) -> Result<Option<(Dimension, Usage)>> {
        let mut tightest: Option<(Dimension, Usage)> = None;
        if !self.is_configured(resource) {
            return Ok(None);
        }
        for dimension in kind.dimensions() {
            let key = dimension.key(resource);
            if !self.engine.is_configured(&key) {
                continue;
            }
            let usage = self.engine.current_usage(&key).await?;
            if tightest.map_or(true, |(_, t)| usage.remaining() < t.remaining()) {
                tightest = Some((*dimension, usage));
            }
        }
        Ok(tightest)
    }

    /// Remove the recorded history of every dimension of a resource. Its ceilings are kept.
    pub async fn clear_resource(&self, resource: &str) -> Result<()> {
        for dimension in Dimension::ALL {
            self.engine.store().remove_key(&dimension.key(resource)).await?;
        }
        Ok(())
    }

    pub fn engine(&self) -> &SlidingWindow<S> {
        &self.engine
    }

    pub fn lock_strategy(&self) -> LockStrategy {
        self.lock_strategy
    }

    // Tracked keys of the dimensions of `kind` that are configured, in dimension order
    fn active_keys(&self, resource: &str, kind: RequestKind) -> Vec<String> {
        if !self.is_configured(resource) {
            return Vec::new();
        }
        kind.dimensions()
            .iter()
            .map(|d| d.key(resource))
            .filter(|key| self.engine.is_configured(key))
            .collect()
    }

    async fn decide_keys(&self, keys: &[String]) -> Result<f64> {
        let mut wait = 0f64;
        for key in keys {
            wait = wait.max(self.engine.decide(key).await?);
        }
        Ok(wait)
    }

    // Every dimension gets the same timestamp
    async fn record_keys(&self, keys: &[String]) -> Result<f64> {
        let now = self.engine.clock().now();
        for key in keys {
            self.engine.record_at(key, now).await?;
        }
        Ok(now)
    }

    async fn lock(&self, resource: &str, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        match self.lock_strategy {
            LockStrategy::PerResource => vec![self.resource_locks.lock(resource).await],
            LockStrategy::PerKey => {
                let mut guards = Vec::with_capacity(keys.len());
                for key in keys {
                    guards.push(self.engine.lock_key(key).await);
                }
                guards
            }
        }
    }
}

pub struct CoordinatorBuilder<S> {
    engine: SlidingWindow<S>,
    lock_strategy: LockStrategy,
}

impl<S: HistoryStore> CoordinatorBuilder<S> {
    /// Default is [LockStrategy::PerResource].
    pub fn lock_strategy(mut self, lock_strategy: LockStrategy) -> Self {
        self.lock_strategy = lock_strategy;
        self
    }

    pub fn build(self) -> Coordinator<S> {
        Coordinator {
            engine: self.engine,
            resources: DashMap::new(),
            resource_locks: LockRegistry::default(),
            lock_strategy: self.lock_strategy,
        }
    }
}
