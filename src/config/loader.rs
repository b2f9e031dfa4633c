// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML text, substituting environment variables first
    pub fn parse(content: &str) -> Result<TelemetryConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: TelemetryConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${TELEMETRY_URL:-http://localhost:8080/upload} -> default if unset
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub fn validate(config: &TelemetryConfig) -> Result<()> {
        if config.queue.storage_dir.as_os_str().is_empty() {
            bail!("queue.storage_dir cannot be empty");
        }

        if config.queue.max_segment_bytes == 0 {
            bail!("queue.max_segment_bytes must be > 0");
        }

        if config.queue.max_total_bytes < config.queue.max_segment_bytes {
            bail!("queue.max_total_bytes must be >= queue.max_segment_bytes");
        }

        if config.queue.max_segments == 0 {
            bail!("queue.max_segments must be > 0");
        }

        if config.upload.interval_seconds == 0 {
            bail!("upload.interval_seconds must be > 0");
        }

        if config.upload.max_batch_events == 0 {
            bail!("upload.max_batch_events must be > 0");
        }

        if config.upload.max_batch_bytes == 0 {
            bail!("upload.max_batch_bytes must be > 0");
        }

        if config.backoff.base_ms == 0 {
            bail!("backoff.base_ms must be > 0");
        }

        if config.backoff.base_ms > config.backoff.max_ms {
            bail!("backoff.base_ms must be <= backoff.max_ms");
        }

        match config.collector.transport.as_str() {
            "http" => match config.collector.transport_config.as_http() {
                Some(http) if http.url.is_empty() => bail!("collector.http.url cannot be empty"),
                Some(http) if http.timeout_seconds == 0 => {
                    bail!("collector.http.timeout_seconds must be > 0")
                }
                Some(_) => {}
                None => bail!("http transport selected but http config missing"),
            },
            "filesystem" => {
                if config.collector.transport_config.as_filesystem().is_none() {
                    bail!("filesystem transport selected but filesystem config missing");
                }
            }
            unknown => bail!("Unknown transport: '{}'. Supported: http, filesystem", unknown),
        }

        Ok(())
    }
}
