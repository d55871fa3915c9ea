//! Metrics and monitoring for the anteroom matchmaking service
//!
//! Prometheus collection plus the HTTP server exposing health probes,
//! metrics, and matchmaking statistics.

pub mod collector;
pub mod health;

pub use collector::{
    AttemptOutcome, MatchMetrics, MatchmakingStats, MetricsCollector, PerformanceMetrics,
    QueueMetrics, ServiceMetrics, SubmissionStatus,
};
pub use health::{HealthServer, HealthServerConfig};
