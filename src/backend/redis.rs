use crate::backend::{HistoryStore, Timestamp};
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_KEY_PREFIX: &str = "rate_limiter:";

/// A [HistoryStore] that keeps each key's history in a Redis sorted set, so that several
/// processes can enforce the same ceilings.
///
/// The sorted set lives at `<prefix><tracked key>`, and every admission is a member whose score is
/// its timestamp. Members carry a nanosecond clock reading and a sequence number next to the
/// timestamp, concurrent admissions with equal timestamps are therefore never merged.
///
/// Every operation is a single Redis command. Failures are returned as [Error::Redis], there is
/// no fallback to a local store.
///
/// [Error::Redis]: crate::Error::Redis
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: Option<String>,
    sequence: Arc<AtomicU64>,
}

impl RedisStore {
    /// Create a RedisStore Builder.
    ///
    /// # Arguments
    ///
    /// * `connection`: A Redis connection manager.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sliding_admission::backend::redis::RedisStore;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let store = RedisStore::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: Some(DEFAULT_KEY_PREFIX.to_owned()),
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }

    fn make_member(&self, timestamp: Timestamp) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{timestamp}:{nanos}:{sequence}")
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Override the prefix applied to all keys given to this store.
    ///
    /// Defaults to [DEFAULT_KEY_PREFIX]. The prefix is used as a 'namespace' to avoid collision
    /// with other keys inside Redis; processes that share ceilings must use the same prefix.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisStore {
        RedisStore {
            connection: self.connection,
            key_prefix: self.key_prefix,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl HistoryStore for RedisStore {
    async fn record(&self, key: &str, timestamp: Timestamp) -> Result<()> {
        let key = self.make_key(key);
        let member = self.make_member(timestamp);
        let mut con = self.connection.clone();
        let () = con.zadd(key.as_ref(), member, timestamp).await?;
        Ok(())
    }

    async fn count_since(&self, key: &str, window_start: Timestamp) -> Result<u64> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let count: u64 = con.zcount(key.as_ref(), window_start, "+inf").await?;
        Ok(count)
    }

    async fn prune_before(&self, key: &str, window_start: Timestamp) -> Result<()> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        // Exclusive upper bound, the boundary itself stays in the window
        let () = con
            .zrembyscore(key.as_ref(), "-inf", format!("({window_start}"))
            .await?;
        Ok(())
    }

    async fn oldest_since(
        &self,
        key: &str,
        window_start: Timestamp,
        default: Timestamp,
    ) -> Result<Timestamp> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let oldest: Vec<(String, f64)> = con
            .zrangebyscore_limit_withscores(key.as_ref(), window_start, "+inf", 0, 1)
            .await?;
        Ok(oldest.first().map(|(_, score)| *score).unwrap_or(default))
    }

    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn remove_key(&self, key: &str) -> Result<()> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
