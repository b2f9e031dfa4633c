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

// Transport trait for delivering upload batches

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Capability that delivers one encoded batch to the remote collector.
///
/// `send` returns `Ok(())` only when the collector acknowledged the batch
/// (a 2xx-equivalent response). Anything else, including timeouts, must be
/// reported as `TelemetryError::DeliveryFailure` so the batch is retried.
///
/// The engine never runs two `send` calls concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport (create directories, warm connections)
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver one batch body
    ///
    /// # Arguments
    /// * `body` - Encoded and compressed `WireBatch`
    async fn send(&self, body: Bytes) -> Result<()>;

    /// Health check
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Get transport type identifier
    fn transport_type(&self) -> &str;
}
