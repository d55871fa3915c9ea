//! AMQP integration for the matchmaking service
//!
//! Inbound match requests are consumed from a durable queue; formed groups are
//! published as session events to a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{MatchRequestConsumer, MatchmakerMessageHandler, MessageHandler};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, MockEventPublisher,
    PublisherConfig,
};
