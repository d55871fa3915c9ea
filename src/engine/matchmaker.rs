//! Matchmaking engine
//!
//! `submit` enqueues a player into its bucket and returns as soon as the store
//! has accepted the write. Each accepted submission then spawns one detached
//! match attempt for that bucket: count under the bucket lock, and if the
//! bucket holds a full group, drain exactly that many members and hand the
//! group to the dispatcher.

use crate::bucket::BucketKeyStrategy;
use crate::config::MatchmakingSettings;
use crate::engine::dispatch::MatchDispatcher;
use crate::error::{MatchmakingError, Result};
use crate::metrics::{AttemptOutcome, MetricsCollector, SubmissionStatus};
use crate::queue::SortedQueue;
use crate::types::{MatchGroup, MatchRequest, PlayerId};
use crate::utils::ArrivalClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// What a single match attempt did
#[derive(Debug, Clone)]
pub enum MatchAttemptOutcome {
    /// The bucket held fewer members than a full group
    NotEnoughPlayers { count: u64 },
    /// Another attempt drained the bucket between count and drain
    LostRace,
    /// A full group was drained but none of its members were well-formed
    Discarded { dropped: usize },
    /// A group was formed and handed to the dispatcher
    Matched(MatchGroup),
}

/// Count of spawned match attempts that have not finished yet
#[derive(Default)]
struct InFlightAttempts {
    count: AtomicUsize,
    idle: Notify,
}

/// Marks one attempt as in flight until dropped
struct InFlightGuard(Arc<InFlightAttempts>);

impl InFlightAttempts {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// The matchmaking engine
#[derive(Clone)]
pub struct Matchmaker {
    queue: Arc<dyn SortedQueue>,
    strategy: Arc<BucketKeyStrategy>,
    settings: Arc<MatchmakingSettings>,
    clock: Arc<ArrivalClock>,
    dispatcher: MatchDispatcher,
    metrics: Arc<MetricsCollector>,
    in_flight: Arc<InFlightAttempts>,
}

impl Matchmaker {
    pub fn new(
        queue: Arc<dyn SortedQueue>,
        mut settings: MatchmakingSettings,
        dispatcher: MatchDispatcher,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        settings.normalize();
        let strategy = BucketKeyStrategy::from_settings(&settings);

        info!(
            "Matchmaker ready - group_size: {}, rating_tolerance: {}, latency_tolerance: {}, store: {}",
            settings.group_size,
            settings.rating_tolerance,
            settings.latency_tolerance,
            queue.backend_name()
        );

        Self {
            queue,
            strategy: Arc::new(strategy),
            settings: Arc::new(settings),
            clock: Arc::new(ArrivalClock::new()),
            dispatcher,
            metrics,
            in_flight: Arc::new(InFlightAttempts::default()),
        }
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    pub fn queue(&self) -> Arc<dyn SortedQueue> {
        self.queue.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Key of the bucket a (rating, latency) pair falls into
    pub fn bucket_key(&self, rating: i32, latency_ms: i32) -> String {
        self.strategy.bucket_key(rating, latency_ms)
    }

    /// Enqueue a player and schedule a match attempt for its bucket.
    ///
    /// Only the enqueue is awaited. Store failures are returned to the caller;
    /// anything that goes wrong while matching is logged instead.
    pub async fn submit(&self, player_id: &str, rating: i32, latency_ms: i32) -> Result<()> {
        let timer = self.metrics.start_timer();

        let member = match self.settings.player_id_format.validate(player_id) {
            Some(member) => member,
            None => {
                self.metrics
                    .record_submission(SubmissionStatus::Rejected, timer.stop());
                return Err(MatchmakingError::InvalidMatchRequest {
                    reason: format!(
                        "player id {:?} is not a valid {} identifier",
                        player_id, self.settings.player_id_format
                    ),
                }
                .into());
            }
        };

        let bucket_key = self.strategy.bucket_key(rating, latency_ms);
        let score = self.clock.next_score();

        if let Err(e) = self.queue.enqueue(&bucket_key, score, &member).await {
            self.metrics
                .record_submission(SubmissionStatus::Failed, timer.stop());
            warn!("Failed to enqueue player '{}' into {}: {}", member, bucket_key, e);
            return Err(e);
        }

        self.metrics
            .record_submission(SubmissionStatus::Accepted, timer.stop());
        debug!(
            "Queued player '{}' (rating: {}, latency: {}ms) in {}",
            member, rating, latency_ms, bucket_key
        );

        self.spawn_attempt(bucket_key);
        Ok(())
    }

    pub async fn submit_request(&self, request: &MatchRequest) -> Result<()> {
        self.submit(&request.player_id, request.rating, request.latency_ms)
            .await
    }

    fn spawn_attempt(&self, bucket_key: String) {
        let matchmaker = self.clone();
        let guard = self.in_flight.enter();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = matchmaker.attempt_match(&bucket_key).await {
                warn!("Match attempt on {} abandoned: {}", bucket_key, e);
            }
        });
    }

    /// Number of spawned match attempts still running
    pub fn attempts_in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Wait until every spawned match attempt has finished, up to `limit`.
    /// Returns false if attempts were still running when `limit` passed.
    pub async fn wait_for_attempts(&self, limit: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.in_flight.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.attempts_in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, idle).await.is_ok()
    }

    /// Try to form one group from a bucket.
    ///
    /// The count and the wait for the drain lock share one attempt deadline.
    /// Once the deadline has passed no drain is started, and a drain that holds
    /// the lock is never cut short, so members are either all handed out or
    /// all left queued.
    pub async fn attempt_match(&self, bucket_key: &str) -> Result<MatchAttemptOutcome> {
        let timer = self.metrics.start_timer();
        let result = self.try_form_group(bucket_key).await;

        let outcome = match &result {
            Ok(MatchAttemptOutcome::NotEnoughPlayers { .. }) => AttemptOutcome::NotEnoughPlayers,
            Ok(MatchAttemptOutcome::LostRace) => AttemptOutcome::LostRace,
            Ok(MatchAttemptOutcome::Discarded { .. }) => AttemptOutcome::Discarded,
            Ok(MatchAttemptOutcome::Matched(_)) => AttemptOutcome::Matched,
            Err(e) => match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::AttemptTimedOut { .. })
                | Some(MatchmakingError::LockTimeout { .. }) => AttemptOutcome::TimedOut,
                _ => AttemptOutcome::Error,
            },
        };
        self.metrics.record_match_attempt(outcome, timer.stop());

        result
    }

    async fn try_form_group(&self, bucket_key: &str) -> Result<MatchAttemptOutcome> {
        let deadline = Instant::now() + self.settings.attempt_deadline();
        let group_size = self.settings.group_size as usize;

        let count = timeout_at(deadline, self.queue.count(bucket_key))
            .await
            .map_err(|_| MatchmakingError::AttemptTimedOut {
                bucket: bucket_key.to_string(),
            })??;

        if count < group_size as u64 {
            trace!("Bucket {} holds {}/{} players", bucket_key, count, group_size);
            return Ok(MatchAttemptOutcome::NotEnoughPlayers { count });
        }

        if Instant::now() >= deadline {
            return Err(MatchmakingError::AttemptTimedOut {
                bucket: bucket_key.to_string(),
            }
            .into());
        }

        let members = self
            .queue
            .drain_lowest(bucket_key, group_size, deadline)
            .await?;
        if members.len() < group_size {
            if !members.is_empty() {
                warn!(
                    "Store returned a partial group of {} from {}, dropping it",
                    members.len(),
                    bucket_key
                );
            }
            debug!("Lost the race for bucket {}", bucket_key);
            return Ok(MatchAttemptOutcome::LostRace);
        }

        let players = self.well_formed_players(bucket_key, members);
        let dropped = group_size - players.len();
        if dropped > 0 {
            self.metrics.record_malformed_entries(dropped);
        }
        if players.is_empty() {
            warn!("Every member drained from {} was malformed", bucket_key);
            return Ok(MatchAttemptOutcome::Discarded { dropped });
        }

        let group = MatchGroup::new(bucket_key, players);
        self.metrics.record_group_formed(group.len());
        info!(
            "Formed group {} from {} with players {:?}",
            group.group_id, bucket_key, group.players
        );

        self.dispatcher.dispatch(group.clone())?;
        Ok(MatchAttemptOutcome::Matched(group))
    }

    fn well_formed_players(&self, bucket_key: &str, members: Vec<String>) -> Vec<PlayerId> {
        members
            .into_iter()
            .filter_map(|member| {
                let parsed = self.settings.player_id_format.validate(&member);
                if parsed.is_none() {
                    warn!(
                        "Dropping malformed queue entry {:?} drained from {}",
                        member, bucket_key
                    );
                }
                parsed
            })
            .collect()
    }

    /// Verify the backing store is reachable
    pub async fn health_check(&self) -> Result<()> {
        self.queue.health_check().await
    }
}
