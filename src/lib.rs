//! Anteroom - matchmaking queue microservice
//!
//! Players are partitioned into buckets by scaled rating and latency. Each
//! submission triggers a match attempt on its bucket; once a bucket holds a
//! full group, the oldest members are drained under a per-bucket lock and
//! handed to the session service.

pub mod amqp;
pub mod bucket;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use bucket::BucketKeyStrategy;
pub use engine::{FnMatchHandler, MatchDispatcher, MatchHandler, Matchmaker};
pub use queue::{InMemorySortedQueue, RedisSortedQueue, SortedQueue, StoreOptions};
pub use session::SessionHandler;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
