//! Configuration management for the anteroom service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values for the matchmaking service.

pub mod app;
pub mod matchmaking;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, ServiceSettings, StoreBackend, StoreSettings,
};
pub use matchmaking::MatchmakingSettings;
