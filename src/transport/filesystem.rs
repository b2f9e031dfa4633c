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

// Filesystem transport implementation

use super::backend::Transport;
use crate::config::FilesystemConfig;
use crate::error::{Result, TelemetryError};
use crate::protocol::CompressionType;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Writes each batch body into a directory instead of the network.
///
/// A batch counts as acknowledged once its file is fully written and synced.
pub struct FilesystemTransport {
    base_path: PathBuf,
    compression: CompressionType,
    counter: AtomicU64,
}

impl FilesystemTransport {
    pub fn new(config: FilesystemConfig, compression: CompressionType) -> Self {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem transport at: {}",
            base_path.display()
        );

        Self {
            base_path,
            compression,
            counter: AtomicU64::new(0),
        }
    }

    /// Get the file path for the next batch
    fn next_file_path(&self) -> PathBuf {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let filename = format!(
            "{}-{:06}.{}",
            Utc::now().timestamp_millis(),
            seq,
            self.compression.extension()
        );
        self.base_path.join(filename)
    }
}

#[async_trait]
impl Transport for FilesystemTransport {
    async fn initialize(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating outbox directory: {}", self.base_path.display());
        }
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| TelemetryError::storage(&self.base_path, e))
    }

    async fn send(&self, body: Bytes) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| TelemetryError::DeliveryFailure(format!("outbox unavailable: {}", e)))?;

        let file_path = self.next_file_path();
        // Write under a temporary name so readers never see a partial batch
        let tmp_path = file_path.with_extension("partial");

        debug!("Writing {} bytes to {}", body.len(), file_path.display());

        let write = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(TelemetryError::DeliveryFailure(format!(
                "failed to write {}: {}",
                file_path.display(),
                e
            )));
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => Ok(!metadata.permissions().readonly()),
            Ok(_) => {
                warn!(
                    "Health check failed - outbox is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access outbox {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn transport_type(&self) -> &str {
        "filesystem"
    }
}
