//! In-process sorted queue
//!
//! Each bucket sits behind its own `tokio::sync::Mutex`, which is the locking
//! primitive for count and drain. Buckets never contend with each other.
//! Expiration is lazy: an expired bucket is treated as empty the next time it
//! is touched, and `purge_expired` drops idle buckets from the map.

use crate::error::{MatchmakingError, Result};
use crate::queue::{SortedQueue, StoreOptions};
use crate::types::QueueEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Bucket {
    /// Sorted by ascending score
    entries: Vec<QueueEntry>,
    expires_at: Option<Instant>,
}

impl Bucket {
    /// Forget the contents if the expiration has passed
    fn expire_if_due(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) if deadline <= now => {
                self.entries.clear();
                self.expires_at = None;
                true
            }
            _ => false,
        }
    }

    fn upsert(&mut self, score: f64, member: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e.member == member) {
            self.entries.remove(pos);
        }
        let pos = self.entries.partition_point(|e| e.score <= score);
        self.entries.insert(
            pos,
            QueueEntry {
                score,
                member: member.to_string(),
            },
        );
    }
}

/// Sorted queue held in process memory
pub struct InMemorySortedQueue {
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    options: StoreOptions,
}

impl InMemorySortedQueue {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Handle to an existing bucket, if any
    fn existing(&self, bucket_key: &str) -> Result<Option<Arc<Mutex<Bucket>>>> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire buckets lock".to_string(),
            })?;
        Ok(buckets.get(bucket_key).cloned())
    }

    /// Handle to a bucket, creating it when absent
    fn get_or_create(&self, bucket_key: &str) -> Result<Arc<Mutex<Bucket>>> {
        if let Some(bucket) = self.existing(bucket_key)? {
            return Ok(bucket);
        }

        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire buckets lock".to_string(),
            })?;
        Ok(buckets.entry(bucket_key.to_string()).or_default().clone())
    }

    /// Number of buckets currently tracked, including empty ones not yet purged
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Ordered snapshot of a bucket, for diagnostics and tests
    pub async fn entries(&self, bucket_key: &str) -> Result<Vec<QueueEntry>> {
        match self.existing(bucket_key)? {
            Some(bucket) => {
                let mut bucket = bucket.lock().await;
                bucket.expire_if_due(Instant::now());
                Ok(bucket.entries.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

impl Default for InMemorySortedQueue {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[async_trait]
impl SortedQueue for InMemorySortedQueue {
    async fn enqueue(&self, bucket_key: &str, score: f64, member: &str) -> Result<()> {
        let bucket = self.get_or_create(bucket_key)?;
        let mut bucket = bucket.lock().await;
        let now = Instant::now();

        if bucket.expire_if_due(now) {
            debug!("Bucket {} expired before insert", bucket_key);
        }
        if bucket.entries.is_empty() {
            bucket.expires_at = Some(now + self.options.bucket_ttl);
        }
        bucket.upsert(score, member);

        trace!(
            "Enqueued {} into {} (size {})",
            member,
            bucket_key,
            bucket.entries.len()
        );
        Ok(())
    }

    async fn count(&self, bucket_key: &str) -> Result<u64> {
        let Some(bucket) = self.existing(bucket_key)? else {
            return Ok(0);
        };
        let mut bucket = bucket.lock().await;
        bucket.expire_if_due(Instant::now());
        Ok(bucket.entries.len() as u64)
    }

    async fn drain_lowest(
        &self,
        bucket_key: &str,
        amount: usize,
        lock_deadline: Instant,
    ) -> Result<Vec<String>> {
        let Some(bucket) = self.existing(bucket_key)? else {
            return Ok(Vec::new());
        };

        let mut bucket = timeout_at(lock_deadline, bucket.lock())
            .await
            .map_err(|_| MatchmakingError::LockTimeout {
                bucket: bucket_key.to_string(),
            })?;
        bucket.expire_if_due(Instant::now());

        if amount == 0 || bucket.entries.len() < amount {
            return Ok(Vec::new());
        }

        let members: Vec<String> = bucket.entries.drain(..amount).map(|e| e.member).collect();
        if bucket.entries.is_empty() {
            bucket.expires_at = None;
        }
        Ok(members)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire buckets lock".to_string(),
            })?;

        let before = buckets.len();
        buckets.retain(|_, bucket| {
            // A handle held elsewhere may be about to insert; keep the bucket.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            match bucket.try_lock() {
                Ok(mut guard) => {
                    guard.expire_if_due(now);
                    !guard.entries.is_empty()
                }
                Err(_) => true,
            }
        });

        Ok(before - buckets.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const KEY: &str = "test:queue:rank_0:latency_0";

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(100)
    }

    #[tokio::test]
    async fn test_drain_returns_lowest_scores_in_order() {
        let queue = InMemorySortedQueue::default();
        queue.enqueue(KEY, 3.0, "c").await.unwrap();
        queue.enqueue(KEY, 1.0, "a").await.unwrap();
        queue.enqueue(KEY, 2.0, "b").await.unwrap();

        assert_eq!(queue.count(KEY).await.unwrap(), 3);
        assert_eq!(queue.drain_lowest(KEY, 2, soon()).await.unwrap(), vec!["a", "b"]);
        assert_eq!(queue.count(KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_is_all_or_nothing() {
        let queue = InMemorySortedQueue::default();
        queue.enqueue(KEY, 1.0, "a").await.unwrap();

        assert!(queue.drain_lowest(KEY, 2, soon()).await.unwrap().is_empty());
        assert_eq!(queue.count(KEY).await.unwrap(), 1);
        assert!(queue.drain_lowest(KEY, 0, soon()).await.unwrap().is_empty());
        assert!(queue.drain_lowest("missing", 1, soon()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reenqueue_overwrites_score() {
        let queue = InMemorySortedQueue::default();
        queue.enqueue(KEY, 1.0, "a").await.unwrap();
        queue.enqueue(KEY, 2.0, "b").await.unwrap();
        queue.enqueue(KEY, 3.0, "a").await.unwrap();

        let entries = queue.entries(KEY).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].member, "b");
        assert_eq!(entries[1].member, "a");
        assert_eq!(entries[1].score, 3.0);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let queue = InMemorySortedQueue::default();
        queue.enqueue("k1", 1.0, "a").await.unwrap();
        queue.enqueue("k2", 2.0, "b").await.unwrap();

        assert_eq!(queue.count("k1").await.unwrap(), 1);
        assert_eq!(queue.count("k2").await.unwrap(), 1);
        assert!(queue.drain_lowest("k1", 2, soon()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bucket_expires_after_ttl() {
        let options = StoreOptions::default().with_bucket_ttl(Duration::from_millis(30));
        let queue = InMemorySortedQueue::new(options);
        queue.enqueue(KEY, 1.0, "a").await.unwrap();
        queue.enqueue(KEY, 2.0, "b").await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(queue.count(KEY).await.unwrap(), 0);
        assert!(queue.drain_lowest(KEY, 2, soon()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expiration_not_refreshed_by_later_inserts() {
        let options = StoreOptions::default().with_bucket_ttl(Duration::from_millis(80));
        let queue = InMemorySortedQueue::new(options);
        queue.enqueue(KEY, 1.0, "a").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(KEY, 2.0, "b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.count(KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_removes_only_idle_buckets() {
        let options = StoreOptions::default().with_bucket_ttl(Duration::from_millis(20));
        let queue = InMemorySortedQueue::new(options);
        queue.enqueue("old", 1.0, "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        queue.enqueue("fresh", 2.0, "b").await.unwrap();

        assert_eq!(queue.purge_expired().await.unwrap(), 1);
        assert_eq!(queue.bucket_count(), 1);
        assert_eq!(queue.count("fresh").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_gives_up_at_lock_deadline() {
        let queue = InMemorySortedQueue::default();
        queue.enqueue(KEY, 1.0, "a").await.unwrap();

        let bucket = queue.existing(KEY).unwrap().unwrap();
        let held = bucket.lock().await;

        let started = Instant::now();
        let err = queue
            .drain_lowest(KEY, 1, started + Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::LockTimeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_millis(80));

        drop(held);
        assert_eq!(queue.count(KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_drains_never_share_members() {
        let queue = Arc::new(InMemorySortedQueue::default());
        for i in 0..100 {
            queue.enqueue(KEY, i as f64, &format!("p{}", i)).await.unwrap();
        }

        let handles: Vec<_> = (0..80)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.drain_lowest(KEY, 2, soon()).await.unwrap() })
            })
            .collect();

        let mut drained = Vec::new();
        for handle in handles {
            let group = handle.await.unwrap();
            assert!(group.is_empty() || group.len() == 2);
            drained.extend(group);
        }

        let total = drained.len();
        drained.sort();
        drained.dedup();
        assert_eq!(drained.len(), total);
        assert_eq!(total, 100);
    }
}
