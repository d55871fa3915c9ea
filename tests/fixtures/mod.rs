//! Test fixtures shared by the integration test targets
#![allow(dead_code)]

use anteroom::config::MatchmakingSettings;
use anteroom::engine::{DispatchWorker, MatchDispatcher, MatchHandler, Matchmaker};
use anteroom::error::Result;
use anteroom::metrics::MetricsCollector;
use anteroom::queue::InMemorySortedQueue;
use anteroom::types::{MatchGroup, PlayerIdFormat};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Match handler that remembers every group it receives
#[derive(Default)]
pub struct RecordingHandler {
    groups: Mutex<Vec<MatchGroup>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn groups(&self) -> Vec<MatchGroup> {
        self.groups.lock().await.clone()
    }

    /// Wait until at least `expected` groups have arrived or `limit` passes
    pub async fn wait_for_groups(&self, expected: usize, limit: Duration) -> Vec<MatchGroup> {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.notify.notified();
            let groups = self.groups().await;
            if groups.len() >= expected || Instant::now() >= deadline {
                return groups;
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }
}

#[async_trait]
impl MatchHandler for RecordingHandler {
    async fn on_match(&self, group: MatchGroup) -> Result<()> {
        self.groups.lock().await.push(group);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// A matchmaker over an in-memory store with a recording handler
pub struct TestSystem {
    pub matchmaker: Matchmaker,
    pub queue: Arc<InMemorySortedQueue>,
    pub handler: Arc<RecordingHandler>,
    pub metrics: Arc<MetricsCollector>,
    pub worker: DispatchWorker,
}

impl TestSystem {
    pub fn new(settings: MatchmakingSettings) -> Self {
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let queue = Arc::new(InMemorySortedQueue::default());
        let handler = Arc::new(RecordingHandler::new());
        let (dispatcher, worker) = MatchDispatcher::start(handler.clone(), metrics.clone());
        let matchmaker = Matchmaker::new(queue.clone(), settings, dispatcher, metrics.clone());

        Self {
            matchmaker,
            queue,
            handler,
            metrics,
            worker,
        }
    }

    /// Readable player names instead of UUIDs
    pub fn with_opaque_ids(group_size: u32, rating_tolerance: i32, latency_tolerance: i32) -> Self {
        let mut settings = MatchmakingSettings::default()
            .with_group_size(group_size)
            .with_tolerances(rating_tolerance, latency_tolerance);
        settings.player_id_format = PlayerIdFormat::Opaque;
        Self::new(settings)
    }

    /// Let spawned match attempts finish
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// `count` random player identifiers in canonical UUID form
pub fn uuid_players(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| uuid::Uuid::new_v4().to_string())
        .collect()
}

/// Panics unless every player appears in exactly one group
pub fn assert_disjoint(groups: &[MatchGroup], expected_players: &[String]) {
    let mut seen = HashSet::new();
    for group in groups {
        for player in &group.players {
            assert!(seen.insert(player.clone()), "{} matched twice", player);
        }
    }

    let expected: HashSet<_> = expected_players.iter().cloned().collect();
    assert_eq!(seen, expected, "matched players differ from submitted ones");
}
