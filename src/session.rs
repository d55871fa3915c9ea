//! Outbound session requests
//!
//! Every formed group becomes a `SessionRequested` event for the session
//! service. Delivery is fire-and-forget: a failed publish is logged and the
//! players are not re-queued.

use crate::amqp::publisher::EventPublisher;
use crate::engine::MatchHandler;
use crate::error::{MatchmakingError, Result};
use crate::types::{MatchGroup, SessionRequested};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Match handler that asks the session service to start a game
pub struct SessionHandler {
    publisher: Arc<dyn EventPublisher>,
}

impl SessionHandler {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl MatchHandler for SessionHandler {
    async fn on_match(&self, group: MatchGroup) -> Result<()> {
        let group_id = group.group_id;
        info!(
            group_id = %group_id,
            bucket = %group.bucket,
            players = ?group.players,
            "Requesting session"
        );

        let start = Instant::now();
        match self
            .publisher
            .publish_session_requested(SessionRequested::from(group))
            .await
        {
            Ok(()) => {
                info!(
                    group_id = %group_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Session requested"
                );
                Ok(())
            }
            Err(e) => {
                error!(group_id = %group_id, "Failed to request session: {}", e);
                Err(MatchmakingError::DispatchFailed {
                    group_id: group_id.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;

    fn group() -> MatchGroup {
        MatchGroup::new(
            "matchmaker:queue:rank_750:latency_20",
            vec!["p1".to_string(), "p2".to_string()],
        )
    }

    #[tokio::test]
    async fn test_publishes_session_request() {
        let publisher = Arc::new(MockEventPublisher::new());
        let handler = SessionHandler::new(publisher.clone());
        let group = group();

        handler.on_match(group.clone()).await.unwrap();

        let events = publisher.get_published_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].group_id, group.group_id);
        assert_eq!(events[0].bucket, group.bucket);
        assert_eq!(events[0].player_ids, group.players);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let publisher = Arc::new(MockEventPublisher::new());
        publisher.set_failing(true);
        let handler = SessionHandler::new(publisher.clone());

        let err = handler.on_match(group()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::DispatchFailed { .. })
        ));
        assert!(publisher.get_published_events().is_empty());
    }
}
