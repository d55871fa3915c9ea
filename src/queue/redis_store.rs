//! Redis-backed sorted queue
//!
//! Buckets are Redis sorted sets. Count and drain run under a single-instance
//! lock (`SET NX PX` with a random token, released by compare-and-delete).
//! The locked section runs on its own task so that a caller dropping the
//! future cannot leave the lock held or abandon members already popped.

use crate::error::{MatchmakingError, Result};
use crate::queue::{lock_key, SortedQueue, StoreOptions};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

fn store_error(e: redis::RedisError) -> anyhow::Error {
    MatchmakingError::StoreUnavailable {
        message: e.to_string(),
    }
    .into()
}

/// Sorted queue stored in Redis
#[derive(Clone)]
pub struct RedisSortedQueue {
    connection: ConnectionManager,
    options: StoreOptions,
}

impl RedisSortedQueue {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str, options: StoreOptions) -> Result<Self> {
        info!("Connecting to Redis sorted queue store");
        let client = redis::Client::open(url).map_err(store_error)?;
        let connection = ConnectionManager::new(client).await.map_err(store_error)?;
        info!("Connected to Redis");
        Ok(Self::with_connection(connection, options))
    }

    pub fn with_connection(connection: ConnectionManager, options: StoreOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Run `op` while holding the bucket's match lock, waiting for the lock
    /// no later than `give_up_at`
    async fn locked<T, F, Fut>(
        &self,
        bucket_key: &str,
        give_up_at: Instant,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(ConnectionManager, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let connection = self.connection.clone();
        let options = self.options.clone();
        let key = bucket_key.to_string();

        let task = tokio::spawn(async move {
            let lock =
                BucketLock::acquire(connection.clone(), &key, &options, give_up_at).await?;
            let result = op(connection, key).await;
            lock.release().await;
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(MatchmakingError::InternalError {
                message: format!("Locked bucket operation failed: {}", e),
            }
            .into()),
        }
    }
}

#[async_trait]
impl SortedQueue for RedisSortedQueue {
    async fn enqueue(&self, bucket_key: &str, score: f64, member: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .zadd(bucket_key, member, score)
            .await
            .map_err(store_error)?;

        // Arm the expiration only if the bucket does not have one yet
        let ttl: redis::RedisResult<i64> = conn.ttl(bucket_key).await;
        if let Ok(-1) = ttl {
            let seconds = self.options.bucket_ttl.as_secs().max(1) as i64;
            let armed: redis::RedisResult<bool> = conn.expire(bucket_key, seconds).await;
            if let Err(e) = armed {
                warn!("Failed to arm expiration on {}: {}", bucket_key, e);
            }
        }

        Ok(())
    }

    async fn count(&self, bucket_key: &str) -> Result<u64> {
        let give_up_at = Instant::now() + self.options.lock_wait;
        self.locked(bucket_key, give_up_at, |mut conn, key| async move {
            let size: u64 = conn.zcard(&key).await.map_err(store_error)?;
            Ok(size)
        })
        .await
    }

    async fn drain_lowest(
        &self,
        bucket_key: &str,
        amount: usize,
        lock_deadline: Instant,
    ) -> Result<Vec<String>> {
        if amount == 0 {
            return Ok(Vec::new());
        }

        self.locked(bucket_key, lock_deadline, move |mut conn, key| async move {
            let size: usize = conn.zcard(&key).await.map_err(store_error)?;
            if size < amount {
                return Ok(Vec::new());
            }

            let popped: Vec<(String, f64)> = conn
                .zpopmin(&key, amount as isize)
                .await
                .map_err(store_error)?;
            Ok(popped.into_iter().map(|(member, _)| member).collect())
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// A held bucket lock
struct BucketLock {
    connection: ConnectionManager,
    key: String,
    token: String,
}

impl BucketLock {
    async fn acquire(
        mut connection: ConnectionManager,
        bucket_key: &str,
        options: &StoreOptions,
        give_up_at: Instant,
    ) -> Result<Self> {
        let key = lock_key(bucket_key);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = options.lock_ttl.as_millis().max(1) as u64;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut connection)
                .await
                .map_err(store_error)?;

            if acquired.is_some() {
                return Ok(Self {
                    connection,
                    key,
                    token,
                });
            }

            if Instant::now() >= give_up_at {
                return Err(MatchmakingError::LockTimeout {
                    bucket: bucket_key.to_string(),
                }
                .into());
            }
            sleep(options.lock_retry_delay).await;
        }
    }

    async fn release(mut self) {
        let released: redis::RedisResult<i64> = redis::Script::new(UNLOCK_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.connection)
            .await;

        match released {
            Ok(1) => {}
            Ok(_) => debug!("Lock {} expired before release", self.key),
            Err(e) => warn!("Failed to release lock {}: {}", self.key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn connect() -> RedisSortedQueue {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
        RedisSortedQueue::connect(&url, StoreOptions::default())
            .await
            .expect("Redis must be running for this test")
    }

    fn unique_key() -> String {
        format!("anteroom-test:queue:{}", Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_enqueue_and_drain() {
        let queue = connect().await;
        let key = unique_key();

        queue.enqueue(&key, 2.0, "b").await.unwrap();
        queue.enqueue(&key, 1.0, "a").await.unwrap();
        assert_eq!(queue.count(&key).await.unwrap(), 2);

        let deadline = Instant::now() + Duration::from_millis(500);
        assert!(queue.drain_lowest(&key, 3, deadline).await.unwrap().is_empty());
        assert_eq!(
            queue.drain_lowest(&key, 2, deadline).await.unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(queue.count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_lock_timeout() {
        let queue = connect().await;
        let key = unique_key();
        queue.enqueue(&key, 1.0, "a").await.unwrap();

        let _held = BucketLock::acquire(
            queue.connection.clone(),
            &key,
            &StoreOptions::default(),
            Instant::now() + Duration::from_millis(500),
        )
        .await
        .unwrap();

        let started = Instant::now();
        let err = queue
            .drain_lowest(&key, 1, started + Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::LockTimeout { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_health_check() {
        let queue = connect().await;
        assert!(queue.health_check().await.is_ok());
    }
}
