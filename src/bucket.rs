//! Bucket key strategy
//!
//! Maps a (rating, latency) pair onto a discrete bucket. Two requests share a
//! bucket iff both their scaled rating and scaled latency are equal, where
//! `scaled = value / (tolerance + 1)`. This is coarse binning: values either
//! side of a bucket boundary land in different buckets however close they are.

use crate::config::matchmaking::{MatchmakingSettings, DEFAULT_KEY_PREFIX};
use serde::{Deserialize, Serialize};

/// Scaled coordinates of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId {
    pub rating: i32,
    pub latency: i32,
}

/// Deterministic mapping from player attributes to bucket keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKeyStrategy {
    prefix: String,
    rating_tolerance: i32,
    latency_tolerance: i32,
}

impl BucketKeyStrategy {
    /// Create a strategy; negative tolerances are clamped to 0
    pub fn new(prefix: impl Into<String>, rating_tolerance: i32, latency_tolerance: i32) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_KEY_PREFIX.to_string()
            } else {
                prefix
            },
            rating_tolerance: rating_tolerance.max(0),
            latency_tolerance: latency_tolerance.max(0),
        }
    }

    pub fn from_settings(settings: &MatchmakingSettings) -> Self {
        Self::new(
            settings.key_prefix.clone(),
            settings.rating_tolerance,
            settings.latency_tolerance,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Scaled bucket coordinates for a request
    pub fn bucket_id(&self, rating: i32, latency: i32) -> BucketId {
        BucketId {
            rating: scale(rating, self.rating_tolerance),
            latency: scale(latency, self.latency_tolerance),
        }
    }

    /// Store key for the bucket a request belongs to
    pub fn bucket_key(&self, rating: i32, latency: i32) -> String {
        let id = self.bucket_id(rating, latency);
        format!(
            "{}:queue:rank_{}:latency_{}",
            self.prefix, id.rating, id.latency
        )
    }
}

impl Default for BucketKeyStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX, 0, 0)
    }
}

/// Integer division by the bucket width. Tolerance is never negative here, and
/// `i32::MAX` is widened so the width does not overflow.
fn scale(value: i32, tolerance: i32) -> i32 {
    (i64::from(value) / (i64::from(tolerance) + 1)) as i32
}
