// Configuration module for the telemetry engine
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut TelemetryConfig) {
    if let Ok(storage_dir) = std::env::var("TELEMETRY_STORAGE_DIR") {
        config.queue.storage_dir = storage_dir.into();
    }

    if let Some(http) = config.collector.transport_config.as_http_mut() {
        if let Ok(url) = std::env::var("TELEMETRY_SERVER_URL") {
            http.url = url;
        }

        if let Ok(api_token) = std::env::var("TELEMETRY_API_TOKEN") {
            http.api_token = Some(api_token);
        }
    }
}
