//! Sorted queue store backing the matchmaking buckets
//!
//! Every bucket is an ordered set of player identifiers keyed by arrival score.
//! `count` and `drain_lowest` on the same bucket are serialised through a
//! per-bucket lock so that two concurrent match attempts can never both claim
//! the same members.

pub mod memory;
pub mod redis_store;

use crate::config::AppConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

pub use self::memory::InMemorySortedQueue;
pub use self::redis_store::RedisSortedQueue;

/// Operations the matchmaking engine needs from its store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SortedQueue: Send + Sync {
    /// Insert or re-score a member. Arms the bucket's inactivity expiration
    /// when the bucket was previously absent or empty.
    async fn enqueue(&self, bucket_key: &str, score: f64, member: &str) -> Result<()>;

    /// Current member count, taken under the bucket lock
    async fn count(&self, bucket_key: &str) -> Result<u64>;

    /// Atomically remove and return the `amount` lowest-score members in
    /// ascending score order. Returns an empty vector, removing nothing, when
    /// fewer than `amount` members are present once the lock is held.
    ///
    /// Waiting for the lock gives up with `LockTimeout` at `lock_deadline`.
    /// Once the lock is held the drain runs to completion.
    async fn drain_lowest(
        &self,
        bucket_key: &str,
        amount: usize,
        lock_deadline: Instant,
    ) -> Result<Vec<String>>;

    /// Verify the store is reachable
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Drop buckets whose inactivity expiration has passed
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Short name for logs and health reports
    fn backend_name(&self) -> &'static str;
}

/// Timing knobs shared by the store implementations
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Inactivity expiration armed on a bucket's first insert
    pub bucket_ttl: Duration,
    /// How long `count` waits for a bucket lock before giving up
    pub lock_wait: Duration,
    /// Expiry of a held lock, for holders that die mid-operation
    pub lock_ttl: Duration,
    /// Pause between lock acquisition attempts
    pub lock_retry_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            bucket_ttl: Duration::from_secs(300),
            lock_wait: Duration::from_millis(100),
            lock_ttl: Duration::from_secs(8),
            lock_retry_delay: Duration::from_millis(5),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bucket_ttl: config.bucket_ttl(),
            lock_wait: config.matchmaking.attempt_deadline(),
            lock_ttl: Duration::from_millis(config.store.lock_ttl_ms),
            lock_retry_delay: Duration::from_millis(config.store.lock_retry_delay_ms),
        }
    }

    pub fn with_bucket_ttl(mut self, bucket_ttl: Duration) -> Self {
        self.bucket_ttl = bucket_ttl;
        self
    }
}

/// Key of the lock guarding a bucket's count and drain
pub fn lock_key(bucket_key: &str) -> String {
    format!("{}:match_lock", bucket_key)
}
