//! AMQP message handlers for inbound match requests
//!
//! The consumer decodes each delivery into a `MatchRequest` and hands it to a
//! `MessageHandler`; the production handler forwards to the matchmaker.

use crate::amqp::messages::MessageUtils;
use crate::engine::Matchmaker;
use crate::error::{MatchmakingError, Result};
use crate::types::MatchRequest;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a decoded match request
    async fn handle_match_request(&self, request: MatchRequest) -> Result<()>;

    /// Handle a delivery that could not be processed
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Forwards match requests to the matchmaker
pub struct MatchmakerMessageHandler {
    matchmaker: Matchmaker,
}

impl MatchmakerMessageHandler {
    pub fn new(matchmaker: Matchmaker) -> Self {
        Self { matchmaker }
    }
}

#[async_trait]
impl MessageHandler for MatchmakerMessageHandler {
    async fn handle_match_request(&self, request: MatchRequest) -> Result<()> {
        self.matchmaker.submit_request(&request).await
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        match error {
            MatchmakingError::InvalidMatchRequest { reason } => {
                warn!(
                    "Rejected match request ({} bytes): {}",
                    message_data.len(),
                    reason
                );
            }
            other => {
                error!(
                    "Failed to process match request ({} bytes): {}",
                    message_data.len(),
                    other
                );
            }
        }
    }
}

/// Consumer for the match request queue
pub struct MatchRequestConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl MatchRequestConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("match-request-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Declare the durable request queue
    pub async fn declare_queue(&self, queue_name: &str) -> Result<()> {
        let args = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        self.channel.queue_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            }
        })?;

        info!("Declared match request queue: {}", queue_name);
        Ok(())
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(MatchRequestDelivery::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming match requests from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming match requests");
        Ok(())
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }
}

/// Per-delivery consumer callback
struct MatchRequestDelivery {
    handler: Arc<dyn MessageHandler>,
}

impl MatchRequestDelivery {
    fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for MatchRequestDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "Match request received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = Instant::now();
        let requeue = match process_payload(self.handler.as_ref(), &content).await {
            Ok(()) => {
                debug!(
                    "Match request processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
                false
            }
            Err(e) => {
                let requeue = should_requeue(&e);
                self.handler.handle_error(e, &content).await;
                requeue
            }
        };

        if requeue {
            warn!(
                "Store unavailable, requeueing delivery {} for another attempt",
                delivery_tag
            );
            if let Err(e) = channel
                .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                .await
            {
                error!("Failed to nack delivery {}: {}", delivery_tag, e);
            }
        } else if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Whether a failed delivery should go back on the queue.
///
/// Only transient store failures are retried. Anything else would fail the
/// same way on every redelivery.
fn should_requeue(error: &MatchmakingError) -> bool {
    matches!(error, MatchmakingError::StoreUnavailable { .. })
}

/// Decode one delivery and pass it to the handler
async fn process_payload(
    handler: &dyn MessageHandler,
    content: &[u8],
) -> std::result::Result<(), MatchmakingError> {
    let request = MessageUtils::deserialize_match_request(content).map_err(into_matchmaking_error)?;

    debug!(
        "Match request parsed - player_id: '{}', rating: {}, latency_ms: {}",
        request.player_id, request.rating, request.latency_ms
    );

    handler
        .handle_match_request(request)
        .await
        .map_err(into_matchmaking_error)
}

fn into_matchmaking_error(error: anyhow::Error) -> MatchmakingError {
    error
        .downcast::<MatchmakingError>()
        .unwrap_or_else(|other| MatchmakingError::InternalError {
            message: other.to_string(),
        })
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_requests: Arc<tokio::sync::Mutex<Vec<MatchRequest>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_requests: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_match_request(&self, request: MatchRequest) -> Result<()> {
        let mut requests = self.received_requests.lock().await;
        requests.push(request);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::engine::{FnMatchHandler, MatchDispatcher};
    use crate::metrics::MetricsCollector;
    use crate::queue::{InMemorySortedQueue, MockSortedQueue, SortedQueue};
    use crate::types::MatchGroup;

    const PLAYER: &str = "9a1f7c0e-1d2b-4a5c-8e6f-0b1c2d3e4f50";

    #[tokio::test]
    async fn test_process_valid_payload() {
        let handler = MockMessageHandler::new();
        let payload = format!(
            r#"{{"player_id":"{}","rating":1500,"latency_ms":42}}"#,
            PLAYER
        );

        process_payload(&handler, payload.as_bytes()).await.unwrap();

        let received = handler.received_requests.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], MatchRequest::new(PLAYER, 1500, 42));
    }

    #[tokio::test]
    async fn test_process_malformed_payload() {
        let handler = MockMessageHandler::new();

        let err = process_payload(&handler, b"garbage").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::InvalidMatchRequest { .. }));
        assert!(handler.received_requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_matchmaker_handler_enqueues() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let queue = Arc::new(InMemorySortedQueue::default());
        let noop = FnMatchHandler::new(|_group: MatchGroup| async { Ok::<(), anyhow::Error>(()) });
        let (dispatcher, _worker) = MatchDispatcher::start(Arc::new(noop), metrics.clone());
        let matchmaker = Matchmaker::new(
            queue.clone(),
            MatchmakingSettings::default().with_group_size(3),
            dispatcher,
            metrics,
        );
        let key = matchmaker.bucket_key(1500, 42);
        let handler = MatchmakerMessageHandler::new(matchmaker);

        handler
            .handle_match_request(MatchRequest::new(PLAYER, 1500, 42))
            .await
            .unwrap();
        assert_eq!(queue.count(&key).await.unwrap(), 1);

        let err = handler
            .handle_match_request(MatchRequest::new("not-a-uuid", 1500, 42))
            .await
            .unwrap_err();
        assert!(matches!(
            into_matchmaking_error(err),
            MatchmakingError::InvalidMatchRequest { .. }
        ));
        assert_eq!(queue.count(&key).await.unwrap(), 1);
    }

    #[test]
    fn test_only_store_failures_are_requeued() {
        assert!(should_requeue(&MatchmakingError::StoreUnavailable {
            message: "connection refused".to_string(),
        }));
        assert!(!should_requeue(&MatchmakingError::InvalidMatchRequest {
            reason: "bad".to_string(),
        }));
        assert!(!should_requeue(&MatchmakingError::InternalError {
            message: "poisoned".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_store_failure_during_submit_is_requeued() {
        let mut queue = MockSortedQueue::new();
        queue.expect_backend_name().return_const("mock");
        queue.expect_enqueue().returning(|_, _, _| {
            Err(MatchmakingError::StoreUnavailable {
                message: "connection refused".to_string(),
            }
            .into())
        });

        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let noop = FnMatchHandler::new(|_group: MatchGroup| async { Ok::<(), anyhow::Error>(()) });
        let (dispatcher, _worker) = MatchDispatcher::start(Arc::new(noop), metrics.clone());
        let matchmaker = Matchmaker::new(
            Arc::new(queue),
            MatchmakingSettings::default(),
            dispatcher,
            metrics,
        );
        let handler = MatchmakerMessageHandler::new(matchmaker);
        let payload = format!(
            r#"{{"player_id":"{}","rating":1500,"latency_ms":42}}"#,
            PLAYER
        );

        let err = process_payload(&handler, payload.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, MatchmakingError::StoreUnavailable { .. }));
        assert!(should_requeue(&err));

        let err = process_payload(&handler, b"garbage").await.unwrap_err();
        assert!(!should_requeue(&err));
    }

    #[tokio::test]
    async fn test_mock_handler_records_errors() {
        let handler = MockMessageHandler::new();
        handler
            .handle_error(
                MatchmakingError::InvalidMatchRequest {
                    reason: "bad".to_string(),
                },
                b"{}",
            )
            .await;

        assert_eq!(handler.errors.lock().await.len(), 1);
    }
}
