//! Integration tests for the anteroom matchmaking service
//!
//! These exercise the engine, in-memory store, dispatcher, and session
//! handler together:
//! - arrival-ordered group formation
//! - bucket boundaries
//! - resubmission and malformed entries
//! - session requests reaching the publisher

mod fixtures;

use anteroom::amqp::publisher::MockEventPublisher;
use anteroom::config::MatchmakingSettings;
use anteroom::engine::{MatchAttemptOutcome, MatchDispatcher, Matchmaker};
use anteroom::metrics::MetricsCollector;
use anteroom::queue::{InMemorySortedQueue, SortedQueue};
use anteroom::session::SessionHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use fixtures::{uuid_players, TestSystem};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_two_players_form_group_in_arrival_order() {
    let system = TestSystem::with_opaque_ids(2, 0, 0);

    assert_ok!(system.matchmaker.submit("A", 100, 20).await);
    assert_ok!(system.matchmaker.submit("B", 100, 20).await);

    let groups = system.handler.wait_for_groups(1, WAIT).await;
    system.settle().await;

    let groups_after = system.handler.groups().await;
    assert_eq!(groups_after.len(), 1, "exactly one dispatch expected");
    assert_eq!(groups[0].players, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(groups[0].bucket, "matchmaker:queue:rank_100:latency_20");

    let key = system.matchmaker.bucket_key(100, 20);
    assert_eq!(system.queue.count(&key).await.unwrap(), 0);

    let stats = system.metrics.snapshot();
    assert_eq!(stats.submissions_accepted, 2);
    assert_eq!(stats.groups_formed, 1);
    assert_eq!(stats.players_matched, 2);
}

#[tokio::test]
async fn test_players_across_bucket_boundary_are_not_matched() {
    let system = TestSystem::with_opaque_ids(2, 50, 0);

    // 10 / 51 = 0 and 80 / 51 = 1
    assert_ok!(system.matchmaker.submit("A", 10, 20).await);
    assert_ok!(system.matchmaker.submit("B", 80, 20).await);
    system.settle().await;

    assert!(system.handler.groups().await.is_empty());
    assert_ne!(
        system.matchmaker.bucket_key(10, 20),
        system.matchmaker.bucket_key(80, 20)
    );
    assert_eq!(
        system
            .queue
            .count(&system.matchmaker.bucket_key(10, 20))
            .await
            .unwrap(),
        1
    );

    // Same bucket once tolerance covers both
    assert_ok!(system.matchmaker.submit("C", 50, 20).await);
    let groups = system.handler.wait_for_groups(1, WAIT).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].players, vec!["A".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn test_under_full_bucket_never_dispatches() {
    let system = TestSystem::with_opaque_ids(3, 0, 0);

    assert_ok!(system.matchmaker.submit("A", 1200, 40).await);
    assert_ok!(system.matchmaker.submit("B", 1200, 40).await);

    let key = system.matchmaker.bucket_key(1200, 40);
    for _ in 0..10 {
        let outcome = system.matchmaker.attempt_match(&key).await.unwrap();
        assert!(matches!(
            outcome,
            MatchAttemptOutcome::NotEnoughPlayers { count: 2 }
        ));
    }
    system.settle().await;

    assert!(system.handler.groups().await.is_empty());
    assert_eq!(system.queue.count(&key).await.unwrap(), 2);
}

#[tokio::test]
async fn test_resubmission_keeps_one_slot_and_moves_to_back() {
    let system = TestSystem::with_opaque_ids(3, 0, 0);

    assert_ok!(system.matchmaker.submit("A", 1500, 30).await);
    assert_ok!(system.matchmaker.submit("B", 1500, 30).await);
    assert_ok!(system.matchmaker.submit("A", 1500, 30).await);
    system.settle().await;

    let key = system.matchmaker.bucket_key(1500, 30);
    assert_eq!(system.queue.count(&key).await.unwrap(), 2);
    assert!(system.handler.groups().await.is_empty());

    assert_ok!(system.matchmaker.submit("C", 1500, 30).await);
    let groups = system.handler.wait_for_groups(1, WAIT).await;

    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0].players,
        vec!["B".to_string(), "A".to_string(), "C".to_string()]
    );
}

#[tokio::test]
async fn test_resubmission_with_new_rating_is_not_deduplicated() {
    let system = TestSystem::with_opaque_ids(2, 0, 0);

    assert_ok!(system.matchmaker.submit("A", 1500, 30).await);
    assert_ok!(system.matchmaker.submit("A", 1600, 30).await);
    system.settle().await;

    assert_eq!(
        system
            .queue
            .count(&system.matchmaker.bucket_key(1500, 30))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        system
            .queue
            .count(&system.matchmaker.bucket_key(1600, 30))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_malformed_members_are_dropped_from_group() {
    let system = TestSystem::new(MatchmakingSettings::default());
    let key = system.matchmaker.bucket_key(900, 15);
    let player = uuid_players(1).remove(0);

    // A corrupted entry that predates every real submission
    assert_ok!(system.queue.enqueue(&key, 0.0, "definitely-not-a-uuid").await);
    assert_ok!(system.matchmaker.submit(&player, 900, 15).await);

    let groups = system.handler.wait_for_groups(1, WAIT).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].players, vec![player]);
    assert_eq!(system.metrics.snapshot().malformed_entries, 1);
    assert_eq!(system.queue.count(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_player_id_is_rejected_before_enqueue() {
    let system = TestSystem::new(MatchmakingSettings::default());

    let result = system.matchmaker.submit("player-one", 1000, 10).await;
    assert!(result.is_err());

    let key = system.matchmaker.bucket_key(1000, 10);
    assert_eq!(system.queue.count(&key).await.unwrap(), 0);
    assert_eq!(system.metrics.snapshot().submissions_rejected, 1);
}

#[tokio::test]
async fn test_groups_reach_session_publisher() {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let publisher = Arc::new(MockEventPublisher::new());
    let handler = Arc::new(SessionHandler::new(publisher.clone()));
    let (dispatcher, worker) = MatchDispatcher::start(handler, metrics.clone());
    let matchmaker = Matchmaker::new(
        Arc::new(InMemorySortedQueue::default()),
        MatchmakingSettings::default().with_group_size(4),
        dispatcher,
        metrics.clone(),
    );

    let players = uuid_players(4);
    for player in &players {
        assert_ok!(matchmaker.submit(player, 2000, 80).await);
    }

    let mut published = Vec::new();
    for _ in 0..100 {
        published = publisher.get_published_events();
        if !published.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(published.len(), 1);
    assert_eq!(published[0].player_ids, players);
    assert_eq!(published[0].bucket, matchmaker.bucket_key(2000, 80));

    worker.shutdown(Duration::from_secs(1)).await;
    assert_eq!(metrics.snapshot().dispatches_succeeded, 1);
}

#[tokio::test]
async fn test_failed_session_request_does_not_requeue_players() {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let publisher = Arc::new(MockEventPublisher::new());
    publisher.set_failing(true);
    let queue = Arc::new(InMemorySortedQueue::default());
    let (dispatcher, worker) = MatchDispatcher::start(
        Arc::new(SessionHandler::new(publisher.clone())),
        metrics.clone(),
    );
    let matchmaker = Matchmaker::new(
        queue.clone(),
        MatchmakingSettings::default(),
        dispatcher,
        metrics.clone(),
    );

    for player in uuid_players(2) {
        assert_ok!(matchmaker.submit(&player, 1100, 25).await);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.shutdown(Duration::from_secs(1)).await;

    let stats = metrics.snapshot();
    assert_eq!(stats.groups_formed, 1);
    assert_eq!(stats.dispatches_failed, 1);
    assert_eq!(
        queue.count(&matchmaker.bucket_key(1100, 25)).await.unwrap(),
        0
    );
}
