//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the anteroom matchmaking
//! service using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome label for a finished submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Accepted,
    Rejected,
    Failed,
}

impl SubmissionStatus {
    fn as_label(&self) -> &'static str {
        match self {
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Failed => "failed",
        }
    }
}

/// Outcome label for one asynchronous match attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Matched,
    NotEnoughPlayers,
    LostRace,
    Discarded,
    Error,
    TimedOut,
}

impl AttemptOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            AttemptOutcome::Matched => "matched",
            AttemptOutcome::NotEnoughPlayers => "not_enough_players",
            AttemptOutcome::LostRace => "lost_race",
            AttemptOutcome::Discarded => "discarded",
            AttemptOutcome::Error => "error",
            AttemptOutcome::TimedOut => "timed_out",
        }
    }
}

/// Point-in-time counters, served on `/stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingStats {
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
    pub submissions_failed: u64,
    pub attempts_matched: u64,
    pub attempts_not_enough_players: u64,
    pub attempts_lost_race: u64,
    pub attempts_discarded: u64,
    pub attempts_failed: u64,
    pub attempts_timed_out: u64,
    pub groups_formed: u64,
    pub players_matched: u64,
    pub malformed_entries: u64,
    pub dispatches_succeeded: u64,
    pub dispatches_failed: u64,
    pub buckets_purged: u64,
}

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    match_metrics: MatchMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Submission and store metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Submissions by status
    pub submissions_total: IntCounterVec,

    /// Drained members that were not valid player identifiers
    pub malformed_entries_total: IntCounter,

    /// Expired buckets swept by the purge task
    pub buckets_purged_total: IntCounter,
}

/// Match attempt and dispatch metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Match attempts by outcome
    pub match_attempts_total: IntCounterVec,

    /// Groups handed to the dispatcher
    pub groups_formed_total: IntCounter,

    /// Players placed in a group
    pub players_matched_total: IntCounter,

    /// Handler invocations by status
    pub dispatches_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time spent computing the key and enqueueing a submission
    pub enqueue_duration: Histogram,

    /// Time spent in one count/drain attempt
    pub attempt_duration: Histogram,

    /// Handler run time by status
    pub dispatch_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a submission finishing, successful or not
    pub fn record_submission(&self, status: SubmissionStatus, duration: Duration) {
        self.queue_metrics
            .submissions_total
            .with_label_values(&[status.as_label()])
            .inc();

        if status == SubmissionStatus::Accepted {
            self.performance_metrics
                .enqueue_duration
                .observe(duration.as_secs_f64());
        }
    }

    /// Record the end of a match attempt
    pub fn record_match_attempt(&self, outcome: AttemptOutcome, duration: Duration) {
        self.match_metrics
            .match_attempts_total
            .with_label_values(&[outcome.as_label()])
            .inc();

        self.performance_metrics
            .attempt_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a group being formed
    pub fn record_group_formed(&self, players: usize) {
        self.match_metrics.groups_formed_total.inc();
        self.match_metrics
            .players_matched_total
            .inc_by(players as u64);
    }

    /// Record malformed members dropped from a drained group
    pub fn record_malformed_entries(&self, count: usize) {
        self.queue_metrics
            .malformed_entries_total
            .inc_by(count as u64);
    }

    /// Record a handler invocation
    pub fn record_dispatch(&self, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failed" };

        self.match_metrics
            .dispatches_total
            .with_label_values(&[status])
            .inc();

        self.performance_metrics
            .dispatch_duration
            .with_label_values(&[status])
            .observe(duration.as_secs_f64());
    }

    /// Record buckets swept by the purge task
    pub fn record_buckets_purged(&self, count: usize) {
        self.queue_metrics.buckets_purged_total.inc_by(count as u64);
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Current counter values
    pub fn snapshot(&self) -> MatchmakingStats {
        let submissions = |status: SubmissionStatus| {
            self.queue_metrics
                .submissions_total
                .with_label_values(&[status.as_label()])
                .get()
        };
        let attempts = |outcome: AttemptOutcome| {
            self.match_metrics
                .match_attempts_total
                .with_label_values(&[outcome.as_label()])
                .get()
        };
        let dispatches =
            |status: &str| self.match_metrics.dispatches_total.with_label_values(&[status]).get();

        MatchmakingStats {
            submissions_accepted: submissions(SubmissionStatus::Accepted),
            submissions_rejected: submissions(SubmissionStatus::Rejected),
            submissions_failed: submissions(SubmissionStatus::Failed),
            attempts_matched: attempts(AttemptOutcome::Matched),
            attempts_not_enough_players: attempts(AttemptOutcome::NotEnoughPlayers),
            attempts_lost_race: attempts(AttemptOutcome::LostRace),
            attempts_discarded: attempts(AttemptOutcome::Discarded),
            attempts_failed: attempts(AttemptOutcome::Error),
            attempts_timed_out: attempts(AttemptOutcome::TimedOut),
            groups_formed: self.match_metrics.groups_formed_total.get(),
            players_matched: self.match_metrics.players_matched_total.get(),
            malformed_entries: self.queue_metrics.malformed_entries_total.get(),
            dispatches_succeeded: dispatches("success"),
            dispatches_failed: dispatches("failed"),
            buckets_purged: self.queue_metrics.buckets_purged_total.get(),
        }
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("anteroom_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "anteroom_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("anteroom_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "anteroom_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("anteroom_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let submissions_total = IntCounterVec::new(
            Opts::new("anteroom_submissions_total", "Match submissions by status"),
            &["status"],
        )?;
        registry.register(Box::new(submissions_total.clone()))?;

        let malformed_entries_total = IntCounter::new(
            "anteroom_malformed_entries_total",
            "Drained queue members dropped as malformed",
        )?;
        registry.register(Box::new(malformed_entries_total.clone()))?;

        let buckets_purged_total = IntCounter::new(
            "anteroom_buckets_purged_total",
            "Expired buckets removed from the store",
        )?;
        registry.register(Box::new(buckets_purged_total.clone()))?;

        Ok(Self {
            submissions_total,
            malformed_entries_total,
            buckets_purged_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_attempts_total = IntCounterVec::new(
            Opts::new("anteroom_match_attempts_total", "Match attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(match_attempts_total.clone()))?;

        let groups_formed_total =
            IntCounter::new("anteroom_groups_formed_total", "Total match groups formed")?;
        registry.register(Box::new(groups_formed_total.clone()))?;

        let players_matched_total =
            IntCounter::new("anteroom_players_matched_total", "Total players matched")?;
        registry.register(Box::new(players_matched_total.clone()))?;

        let dispatches_total = IntCounterVec::new(
            Opts::new("anteroom_dispatches_total", "Match handler invocations"),
            &["status"],
        )?;
        registry.register(Box::new(dispatches_total.clone()))?;

        Ok(Self {
            match_attempts_total,
            groups_formed_total,
            players_matched_total,
            dispatches_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueue_duration = Histogram::with_opts(
            HistogramOpts::new(
                "anteroom_enqueue_duration_seconds",
                "Submission enqueue time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(enqueue_duration.clone()))?;

        let attempt_duration = Histogram::with_opts(
            HistogramOpts::new(
                "anteroom_match_attempt_duration_seconds",
                "Match attempt time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(attempt_duration.clone()))?;

        let dispatch_duration = HistogramVec::new(
            HistogramOpts::new(
                "anteroom_dispatch_duration_seconds",
                "Match handler run time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["status"],
        )?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "anteroom_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            enqueue_duration,
            attempt_duration,
            dispatch_duration,
            amqp_operation_duration,
        })
    }
}
