//! Common types used throughout the matchmaking service

use crate::utils::{current_timestamp, generate_group_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a queued player
pub type PlayerId = String;

/// Unique identifier for a formed match group
pub type GroupId = Uuid;

/// Inbound request to be matched with compatible players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub player_id: PlayerId,
    pub rating: i32,
    pub latency_ms: i32,
}

impl MatchRequest {
    pub fn new(player_id: impl Into<PlayerId>, rating: i32, latency_ms: i32) -> Self {
        Self {
            player_id: player_id.into(),
            rating,
            latency_ms,
        }
    }
}

/// A member of a bucket as held by the sorted queue store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Arrival timestamp, lowest pops first
    pub score: f64,
    pub member: String,
}

/// A group of players drained together from one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGroup {
    pub group_id: GroupId,
    pub bucket: String,
    /// Players in ascending arrival order
    pub players: Vec<PlayerId>,
    pub formed_at: DateTime<Utc>,
}

impl MatchGroup {
    pub fn new(bucket: impl Into<String>, players: Vec<PlayerId>) -> Self {
        Self {
            group_id: generate_group_id(),
            bucket: bucket.into(),
            players,
            formed_at: current_timestamp(),
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Which strings count as well-formed player identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerIdFormat {
    /// RFC 4122 UUIDs, normalised to lowercase hyphenated form
    #[default]
    Uuid,
    /// Any non-empty token without whitespace or control characters
    Opaque,
}

impl PlayerIdFormat {
    /// Maximum length accepted for opaque identifiers
    pub const MAX_OPAQUE_LEN: usize = 128;

    /// Validate a raw identifier, returning its canonical form
    pub fn validate(&self, raw: &str) -> Option<PlayerId> {
        match self {
            PlayerIdFormat::Uuid => Uuid::parse_str(raw).ok().map(|id| id.to_string()),
            PlayerIdFormat::Opaque => {
                let valid = !raw.is_empty()
                    && raw.len() <= Self::MAX_OPAQUE_LEN
                    && !raw.chars().any(|c| c.is_whitespace() || c.is_control());
                valid.then(|| raw.to_string())
            }
        }
    }
}

impl std::fmt::Display for PlayerIdFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerIdFormat::Uuid => write!(f, "uuid"),
            PlayerIdFormat::Opaque => write!(f, "opaque"),
        }
    }
}

impl std::str::FromStr for PlayerIdFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uuid" => Ok(PlayerIdFormat::Uuid),
            "opaque" => Ok(PlayerIdFormat::Opaque),
            other => Err(format!("unknown player id format: {}", other)),
        }
    }
}

/// Event emitted towards the session service when a group is formed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequested {
    pub group_id: GroupId,
    pub bucket: String,
    pub player_ids: Vec<PlayerId>,
    pub timestamp: DateTime<Utc>,
}

impl From<MatchGroup> for SessionRequested {
    fn from(group: MatchGroup) -> Self {
        Self {
            group_id: group.group_id,
            bucket: group.bucket,
            player_ids: group.players,
            timestamp: group.formed_at,
        }
    }
}

/// Union type for all AMQP messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmqpMessage {
    MatchRequest(MatchRequest),
    SessionRequested(SessionRequested),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format_normalises() {
        let raw = "6F9619FF-8B86-D011-B42D-00CF4FC964FF";
        let parsed = PlayerIdFormat::Uuid.validate(raw).unwrap();
        assert_eq!(parsed, "6f9619ff-8b86-d011-b42d-00cf4fc964ff");
        assert!(PlayerIdFormat::Uuid.validate("player1").is_none());
        assert!(PlayerIdFormat::Uuid.validate("").is_none());
    }

    #[test]
    fn test_opaque_format() {
        assert_eq!(
            PlayerIdFormat::Opaque.validate("player_1"),
            Some("player_1".to_string())
        );
        assert!(PlayerIdFormat::Opaque.validate("").is_none());
        assert!(PlayerIdFormat::Opaque.validate("has space").is_none());
        assert!(PlayerIdFormat::Opaque.validate("tab\there").is_none());
        assert!(PlayerIdFormat::Opaque
            .validate(&"x".repeat(PlayerIdFormat::MAX_OPAQUE_LEN + 1))
            .is_none());
    }

    #[test]
    fn test_player_id_format_from_str() {
        assert_eq!("UUID".parse::<PlayerIdFormat>(), Ok(PlayerIdFormat::Uuid));
        assert_eq!(
            "opaque".parse::<PlayerIdFormat>(),
            Ok(PlayerIdFormat::Opaque)
        );
        assert!("numeric".parse::<PlayerIdFormat>().is_err());
    }

    #[test]
    fn test_session_requested_from_group() {
        let group = MatchGroup::new("matchmaker:queue:rank_1:latency_0", vec!["a".into(), "b".into()]);
        let group_id = group.group_id;
        let event = SessionRequested::from(group);
        assert_eq!(event.group_id, group_id);
        assert_eq!(event.player_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_match_groups_get_distinct_ids() {
        let first = MatchGroup::new("k", vec!["a".into()]);
        let second = MatchGroup::new("k", vec!["a".into()]);
        assert_ne!(first.group_id, second.group_id);
        assert!(second.formed_at >= first.formed_at);
    }
}
