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

// HTTP transport implementation

use super::backend::Transport;
use crate::config::HttpConfig;
use crate::error::{Result, TelemetryError};
use crate::protocol::CompressionType;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// POSTs each batch to the collector URL
pub struct HttpTransport {
    client: Client,
    url: String,
    content_type: String,
    compression: CompressionType,
}

impl HttpTransport {
    pub fn new(config: HttpConfig, compression: CompressionType) -> Result<Self> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds));

        // Add API token if provided
        if let Some(token) = &config.api_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth_value)
                    .map_err(|e| TelemetryError::Config(format!("Invalid API token: {}", e)))?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder
            .build()
            .map_err(|e| TelemetryError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url,
            content_type: config.content_type,
            compression,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: Bytes) -> Result<()> {
        let size = body.len();
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, self.content_type.as_str());

        if let Some(encoding) = self.compression.content_encoding() {
            request = request.header(reqwest::header::CONTENT_ENCODING, encoding);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                TelemetryError::DeliveryFailure(format!("request to {} timed out", self.url))
            } else {
                TelemetryError::DeliveryFailure(format!("failed to send request: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TelemetryError::DeliveryFailure(format!(
                "collector responded with status {}: {}",
                status, error_text
            )));
        }

        debug!("Collector acknowledged {} bytes", size);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.head(&self.url).send().await {
            Ok(response) if !response.status().is_server_error() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn transport_type(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_creation() {
        let config = HttpConfig {
            url: "http://localhost:8080/upload".to_string(),
            api_token: Some("secret".to_string()),
            ..HttpConfig::default()
        };
        let transport = HttpTransport::new(config, CompressionType::Gzip).unwrap();
        assert_eq!(transport.transport_type(), "http");
        assert_eq!(transport.url(), "http://localhost:8080/upload");
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config = HttpConfig {
            url: "http://localhost:8080/upload".to_string(),
            api_token: Some("bad\ntoken".to_string()),
            ..HttpConfig::default()
        };
        let result = HttpTransport::new(config, CompressionType::None);
        match result {
            Err(e) => {
                assert!(matches!(e, TelemetryError::Config(_)));
                assert!(!e.is_retryable());
            }
            Ok(_) => panic!("token with a newline was accepted"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_delivery_failure() {
        let config = HttpConfig {
            url: "http://127.0.0.1:1/upload".to_string(),
            timeout_seconds: 2,
            ..HttpConfig::default()
        };
        let transport = HttpTransport::new(config, CompressionType::None).unwrap();
        let result = transport.send(Bytes::from_static(b"batch")).await;
        assert!(matches!(result, Err(TelemetryError::DeliveryFailure(_))));
    }
}
