//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the anteroom
//! matchmaking service, including readiness and liveness probes.

use crate::engine::Matchmaker;
use crate::metrics::MatchmakingStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Store pings slower than this report the store as degraded
const SLOW_STORE_THRESHOLD: Duration = Duration::from_millis(250);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

impl HealthStatus {
    /// Numeric form used by the `health_status` gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Everything a health probe needs to look at
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub matchmaker: Matchmaker,
    running: Arc<AtomicBool>,
    started_at: Instant,
}

impl HealthContext {
    pub fn new(service_name: impl Into<String>, matchmaker: Matchmaker) -> Self {
        Self {
            service_name: service_name.into(),
            matchmaker,
            running: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub store_backend: String,
    pub group_size: u32,
    pub uptime_seconds: u64,
    pub matchmaking: MatchmakingStats,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(context),
            Self::check_store(context).await,
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(&check.status));

        let metrics = context.matchmaker.metrics();
        metrics.update_health_status(status.as_gauge());
        for check in &checks {
            metrics.update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
        }
        metrics
            .service()
            .uptime_seconds
            .set(context.uptime().as_secs() as i64);

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(context),
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if context.is_running() {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service is running and its store answers
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !context.is_running() {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_store(context).await.status)
    }

    fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let (status, message) = if context.is_running() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }

    async fn check_store(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let result = context.matchmaker.health_check().await;
        let elapsed = start.elapsed();

        let (status, message) = match result {
            Ok(()) if elapsed > SLOW_STORE_THRESHOLD => (
                HealthStatus::Degraded,
                Some(format!("Store responded in {}ms", elapsed.as_millis())),
            ),
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => {
                debug!("Store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: format!("store_{}", context.matchmaker.queue().backend_name()),
            status,
            message,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn gather_service_stats(context: &HealthContext) -> ServiceStats {
        ServiceStats {
            store_backend: context.matchmaker.queue().backend_name().to_string(),
            group_size: context.matchmaker.settings().group_size,
            uptime_seconds: context.uptime().as_secs(),
            matchmaking: context.matchmaker.metrics().snapshot(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
