//! Service layer for the anteroom matchmaking service
//!
//! Application state, component wiring, health probes, and background task
//! management for the production service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthContext, HealthStatus};
