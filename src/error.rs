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

// Error taxonomy for the telemetry engine

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors produced by the telemetry engine.
///
/// Setup surfaces `StorageUnavailable`, `Config` and `Runtime`. Everything
/// else is handled inside the engine: retried, truncated, or dropped with a
/// log line.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Storage directory cannot be created, read or written. Fatal at setup.
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single event could not be appended to the queue.
    #[error("failed to write record: {0}")]
    RecordWriteFailure(#[from] std::io::Error),

    /// Framing or checksum mismatch found while scanning a segment.
    #[error("corrupt record in segment {segment} at offset {offset}: {detail}")]
    RecordCorrupt {
        segment: u64,
        offset: u64,
        detail: String,
    },

    /// Transport error, non-success status or timeout.
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    /// Installation id could not be persisted.
    #[error("failed to persist installation id: {0}")]
    IdentityPersistFailure(String),

    /// Event rejected before it reached the queue.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Batch body could not be encoded or compressed.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Background upload runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl TelemetryError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TelemetryError::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// True for errors that leave queued events in place for a later retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::DeliveryFailure(_) | TelemetryError::RecordWriteFailure(_)
        )
    }
}
