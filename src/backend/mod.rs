pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Seconds since the UNIX epoch.
pub type Timestamp = f64;

/// Describes where admission history is kept.
///
/// A store records one timestamp per admission against a tracked key and answers windowed
/// queries over those timestamps. Equal timestamps must all be retained, a store may never
/// deduplicate concurrent admissions.
///
/// Implementations must be safe to share between tasks; the engine never wraps a store in its own
/// lock for individual operations.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a timestamp to the history of `key`.
    async fn record(&self, key: &str, timestamp: Timestamp) -> Result<()>;

    /// Number of recorded timestamps `>= window_start`.
    async fn count_since(&self, key: &str, window_start: Timestamp) -> Result<u64>;

    /// Remove every timestamp `< window_start`.
    ///
    /// Idempotent, and never removes a timestamp `>= window_start`.
    async fn prune_before(&self, key: &str, window_start: Timestamp) -> Result<()>;

    /// The smallest timestamp `>= window_start`, or `default` if there is none.
    async fn oldest_since(
        &self,
        key: &str,
        window_start: Timestamp,
        default: Timestamp,
    ) -> Result<Timestamp>;

    /// Removes the whole history for a given key.
    ///
    /// Intended to be used to reset a key before changing its window.
    async fn remove_key(&self, key: &str) -> Result<()>;

    /// Short label identifying the backend in emitted events.
    fn kind(&self) -> &'static str;
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn record(&self, key: &str, timestamp: Timestamp) -> Result<()> {
        (**self).record(key, timestamp).await
    }

    async fn count_since(&self, key: &str, window_start: Timestamp) -> Result<u64> {
        (**self).count_since(key, window_start).await
    }

    async fn prune_before(&self, key: &str, window_start: Timestamp) -> Result<()> {
        (**self).prune_before(key, window_start).await
    }

    async fn oldest_since(
        &self,
        key: &str,
        window_start: Timestamp,
        default: Timestamp,
    ) -> Result<Timestamp> {
        (**self).oldest_since(key, window_start, default).await
    }

    async fn remove_key(&self, key: &str) -> Result<()> {
        (**self).remove_key(key).await
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }
}
