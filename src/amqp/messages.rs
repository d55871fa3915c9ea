//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use crate::utils::current_timestamp;

/// AMQP queue and exchange names
pub const MATCH_REQUEST_QUEUE: &str = "matchmaking.match_requests";
pub const SESSION_EVENTS_EXCHANGE: &str = "matchmaking.session_events";

/// Routing keys
pub const MATCH_REQUEST_ROUTING_KEY: &str = "match.request";
pub const SESSION_REQUESTED_ROUTING_KEY: &str = "session.requested";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: current_timestamp(),
            routing_key: routing_key.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidMatchRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a match request to bytes
    pub fn serialize_match_request(request: &MatchRequest) -> Result<Vec<u8>> {
        Self::validate_match_request(request)?;
        Self::serialize_message(request)
    }

    /// Deserialize a match request from bytes
    pub fn deserialize_match_request(bytes: &[u8]) -> Result<MatchRequest> {
        let request: MatchRequest =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidMatchRequest {
                reason: format!("Failed to deserialize match request: {}", e),
            })?;

        Self::validate_match_request(&request)?;
        Ok(request)
    }

    /// Shape checks only. Identifier format is enforced by the matchmaker,
    /// which knows the configured format.
    pub fn validate_match_request(request: &MatchRequest) -> Result<()> {
        if request.player_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        Ok(())
    }

    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn get_routing_key(message: &AmqpMessage) -> &'static str {
        match message {
            AmqpMessage::MatchRequest(_) => MATCH_REQUEST_ROUTING_KEY,
            AmqpMessage::SessionRequested(_) => SESSION_REQUESTED_ROUTING_KEY,
        }
    }
}
