//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generate a new unique group ID
pub fn generate_group_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Source of queue scores for arriving players.
///
/// Scores are wall-clock microseconds since the Unix epoch, bumped by one
/// whenever the clock has not advanced since the previous call. Microseconds
/// stay well inside the 53-bit mantissa of an `f64`, so store scores compare
/// exactly.
#[derive(Debug, Default)]
pub struct ArrivalClock {
    last: AtomicU64,
}

impl ArrivalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next strictly increasing arrival score
    pub fn next_score(&self) -> f64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next as f64,
                Err(actual) => prev = actual,
            }
        }
    }
}
