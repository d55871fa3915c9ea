//! Matchmaking engine configuration

use crate::types::PlayerIdFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_GROUP_SIZE: u32 = 2;
pub const DEFAULT_KEY_PREFIX: &str = "matchmaker";
pub const DEFAULT_ATTEMPT_DEADLINE_MS: u64 = 100;

/// Settings that shape bucketing and group formation.
///
/// Set once at startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Players per formed group
    pub group_size: u32,
    /// Width of a rating bucket minus one; 0 means exact match
    pub rating_tolerance: i32,
    /// Width of a latency bucket minus one; 0 means exact match
    pub latency_tolerance: i32,
    /// Namespace prepended to every bucket key
    pub key_prefix: String,
    /// Upper bound for one asynchronous count/drain attempt
    pub attempt_deadline_ms: u64,
    /// Which queued members count as well-formed player identifiers
    pub player_id_format: PlayerIdFormat,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            rating_tolerance: 0,
            latency_tolerance: 0,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            attempt_deadline_ms: DEFAULT_ATTEMPT_DEADLINE_MS,
            player_id_format: PlayerIdFormat::default(),
        }
    }
}

impl MatchmakingSettings {
    /// Replace out-of-range values with defaults instead of rejecting them
    pub fn normalize(&mut self) {
        if self.group_size == 0 {
            warn!(
                "Group size 0 is not allowed, using default of {}",
                DEFAULT_GROUP_SIZE
            );
            self.group_size = DEFAULT_GROUP_SIZE;
        }
        if self.rating_tolerance < 0 {
            warn!(
                "Negative rating tolerance {} clamped to 0",
                self.rating_tolerance
            );
            self.rating_tolerance = 0;
        }
        if self.latency_tolerance < 0 {
            warn!(
                "Negative latency tolerance {} clamped to 0",
                self.latency_tolerance
            );
            self.latency_tolerance = 0;
        }
        if self.key_prefix.is_empty() {
            self.key_prefix = DEFAULT_KEY_PREFIX.to_string();
        }
        if self.attempt_deadline_ms == 0 {
            self.attempt_deadline_ms = DEFAULT_ATTEMPT_DEADLINE_MS;
        }
    }

    /// Builder-style copy with a different group size
    pub fn with_group_size(mut self, group_size: u32) -> Self {
        self.group_size = group_size;
        self
    }

    /// Builder-style copy with different tolerances
    pub fn with_tolerances(mut self, rating_tolerance: i32, latency_tolerance: i32) -> Self {
        self.rating_tolerance = rating_tolerance;
        self.latency_tolerance = latency_tolerance;
        self
    }

    pub fn attempt_deadline(&self) -> Duration {
        Duration::from_millis(self.attempt_deadline_ms)
    }
}
