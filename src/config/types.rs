// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for the telemetry engine

use crate::protocol::CompressionType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TelemetryConfig {
    pub collector: CollectorConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    /// Defaults pointed at one collector URL and one storage directory.
    pub fn new(server_url: impl Into<String>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            collector: CollectorConfig {
                transport: "http".to_string(),
                compression: CompressionType::default(),
                transport_config: TransportConfig::Http {
                    http: HttpConfig {
                        url: server_url.into(),
                        ..HttpConfig::default()
                    },
                },
            },
            queue: QueueConfig {
                storage_dir: storage_dir.into(),
                ..QueueConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Collector configuration with transport selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Transport type: "http" or "filesystem"
    pub transport: String,

    #[serde(default)]
    pub compression: CompressionType,

    /// Transport-specific configuration
    #[serde(flatten)]
    pub transport_config: TransportConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            transport: "http".to_string(),
            compression: CompressionType::default(),
            transport_config: TransportConfig::Http {
                http: HttpConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TransportConfig {
    Http {
        #[serde(rename = "http")]
        http: HttpConfig,
    },
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemConfig,
    },
}

impl TransportConfig {
    pub fn as_http(&self) -> Option<&HttpConfig> {
        match self {
            TransportConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_http_mut(&mut self) -> Option<&mut HttpConfig> {
        match self {
            TransportConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&FilesystemConfig> {
        match self {
            TransportConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_token: None,
            timeout_seconds: default_timeout(),
            content_type: default_content_type(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/var/lib/telemetry/outbox".to_string(),
        }
    }
}

/// Local queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub storage_dir: PathBuf,

    /// Segment size at which the current segment is sealed
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,

    /// Oldest segments are purged once the queue grows past this
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Fsync after every append
    #[serde(default = "default_true")]
    pub sync_on_append: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("telemetry"),
            max_segment_bytes: default_max_segment_bytes(),
            max_total_bytes: default_max_total_bytes(),
            max_segments: default_max_segments(),
            sync_on_append: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Periodic upload trigger
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_max_batch_events")]
    pub max_batch_events: usize,

    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Trigger one upload at setup when recovered data is pending
    #[serde(default = "default_true")]
    pub upload_on_start: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            max_batch_events: default_max_batch_events(),
            max_batch_bytes: default_max_batch_bytes(),
            upload_on_start: true,
        }
    }
}

impl UploadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"

    /// Verbose per-event diagnostics
    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            debug_mode: false,
        }
    }
}

// Default value functions
fn default_timeout() -> u64 { 30 }
fn default_content_type() -> String { "application/x-protobuf".to_string() }
fn default_max_segment_bytes() -> u64 { 256 * 1024 }
fn default_max_total_bytes() -> u64 { 64 * 1024 * 1024 }
fn default_max_segments() -> usize { 256 }
fn default_true() -> bool { true }
fn default_interval() -> u64 { 15 * 60 }
fn default_max_batch_events() -> usize { 500 }
fn default_max_batch_bytes() -> usize { 512 * 1024 }
fn default_backoff_base() -> u64 { 60 * 1000 }
fn default_backoff_max() -> u64 { 24 * 60 * 60 * 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
