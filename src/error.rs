//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid match request: {reason}")]
    InvalidMatchRequest { reason: String },

    #[error("Queue store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Timed out acquiring lock for bucket: {bucket}")]
    LockTimeout { bucket: String },

    #[error("Match attempt deadline exceeded for bucket: {bucket}")]
    AttemptTimedOut { bucket: String },

    #[error("Match dispatch failed for group {group_id}: {reason}")]
    DispatchFailed { group_id: String, reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
