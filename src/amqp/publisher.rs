//! AMQP event publisher for outbound session events

use crate::amqp::messages::{
    MessageEnvelope, SESSION_EVENTS_EXCHANGE, SESSION_REQUESTED_ROUTING_KEY,
};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result};
use crate::types::SessionRequested;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const MAX_PUBLISH_BACKOFF_MS: u64 = 5000;

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Ask the session service to create a session for a formed group
    async fn publish_session_requested(&self, event: SessionRequested) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Bound on a single publish attempt
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: SESSION_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            publish_timeout_ms: 2000,
        }
    }
}

impl PublisherConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            exchange: config.amqp.session_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            publish_timeout_ms: config.amqp.publish_timeout_ms,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared session events exchange: {}", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish_with_retry<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    debug!(
                        "Published message {} to exchange {}",
                        envelope.correlation_id, self.config.exchange
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(MAX_PUBLISH_BACKOFF_MS),
                    );
                }
            }
        }
    }

    /// Single publish attempt, bounded by the publish timeout
    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_delivery_mode(2);

        let publish = self.channel.basic_publish(properties, payload, args);
        match timeout(Duration::from_millis(self.config.publish_timeout_ms), publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            }
            .into()),
            Err(_) => Err(MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Publish timed out after {}ms",
                    self.config.publish_timeout_ms
                ),
            }
            .into()),
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_session_requested(&self, event: SessionRequested) -> Result<()> {
        let envelope = MessageEnvelope::new(event, SESSION_REQUESTED_ROUTING_KEY);
        self.publish_with_retry(&envelope).await
    }
}

/// Publisher that only logs; used when AMQP is disabled
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_session_requested(&self, event: SessionRequested) -> Result<()> {
        info!(
            group_id = %event.group_id,
            bucket = %event.bucket,
            players = ?event.player_ids,
            "Session requested (not published)"
        );
        Ok(())
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: Mutex<Vec<SessionRequested>>,
    fail: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn get_published_events(&self) -> Vec<SessionRequested> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_session_requested(&self, event: SessionRequested) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MatchmakingError::AmqpConnectionFailed {
                message: "mock publisher failure".to_string(),
            }
            .into());
        }

        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
