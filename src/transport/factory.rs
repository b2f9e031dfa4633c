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

// Transport factory for creating transports from configuration

use super::backend::Transport;
use super::filesystem::FilesystemTransport;
use super::http::HttpTransport;
use crate::config::CollectorConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

#[cfg(test)]
use crate::config::TransportConfig;

pub struct TransportFactory;

impl TransportFactory {
    /// Create transport from configuration
    pub fn create(config: &CollectorConfig) -> Result<Arc<dyn Transport>> {
        match config.transport.as_str() {
            "http" => {
                let http_config = config
                    .transport_config
                    .as_http()
                    .ok_or_else(|| anyhow::anyhow!("HTTP transport config missing"))?;

                let transport = HttpTransport::new(http_config.clone(), config.compression)?;
                Ok(Arc::new(transport))
            }

            "filesystem" => {
                let fs_config = config
                    .transport_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem transport config missing"))?;

                let transport = FilesystemTransport::new(fs_config.clone(), config.compression);
                Ok(Arc::new(transport))
            }

            unknown => bail!(
                "Unknown transport: '{}'. Supported: http, filesystem",
                unknown
            ),
        }
    }
}
