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

// End-to-end engine scenarios with capturing and filesystem transports

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemetry_engine::config::{FilesystemConfig, TransportConfig};
use telemetry_engine::protocol::decode_batch;
use telemetry_engine::{
    CompressionType, TelemetryConfig, TelemetryEngine, TelemetryError, Transport, WireBatch,
};
use tempfile::TempDir;
use tokio::time::timeout;

#[derive(Default)]
struct CapturingTransport {
    fail: bool,
    bodies: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl Transport for CapturingTransport {
    async fn send(&self, body: Bytes) -> telemetry_engine::Result<()> {
        if self.fail {
            return Err(TelemetryError::DeliveryFailure("collector offline".to_string()));
        }
        self.bodies.lock().unwrap().push(body);
        Ok(())
    }

    fn transport_type(&self) -> &str {
        "capture"
    }
}

impl CapturingTransport {
    fn batches(&self) -> Vec<WireBatch> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|body| decode_batch(body, CompressionType::Gzip).unwrap())
            .collect()
    }
}

fn test_config(temp_dir: &TempDir) -> TelemetryConfig {
    let mut config = TelemetryConfig::new("http://collector.invalid/upload", temp_dir.path().join("queue"));
    config.upload.interval_seconds = 3600;
    config.backoff.base_ms = 60_000;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_login_scenario_uploads_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Arc::new(CapturingTransport::default());
    let engine =
        TelemetryEngine::with_transport(test_config(&temp_dir), transport.clone(), "install-42")
            .unwrap();

    assert!(engine.log_event("app_started"));
    assert!(engine.log_event_value("login", "user123"));

    engine.force_upload();
    timeout(Duration::from_secs(5), engine.wait_for_attempts(1))
        .await
        .expect("upload did not complete");

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.installation_id, "install-42");
    assert_eq!(batch.events.len(), 2);
    assert_eq!(batch.events[0].name, "app_started");
    assert_eq!(batch.events[1].name, "login");
    assert_eq!(batch.events[1].value.as_deref(), Some("user123"));
    assert!(batch.events[1].pairs.is_empty());
    assert!(batch.events[0].sequence < batch.events[1].sequence);

    let status = engine.status();
    assert_eq!(status.queue.checkpoint, status.queue.tail);
    assert_eq!(status.queue.pending_bytes, 0);
    assert_eq!(status.recorded_events, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_survive_restart_and_upload_on_start() {
    let temp_dir = TempDir::new().unwrap();

    {
        let offline = Arc::new(CapturingTransport {
            fail: true,
            ..CapturingTransport::default()
        });
        let engine =
            TelemetryEngine::with_transport(test_config(&temp_dir), offline, "install-7").unwrap();
        engine.log_event("one");
        engine.log_event_value("two", "2");
        engine.log_json_event(r#"{"name": "three", "nested": {"k": 1}}"#);

        engine.force_upload();
        timeout(Duration::from_secs(5), engine.wait_for_attempts(1))
            .await
            .unwrap();
        assert_eq!(engine.status().scheduler.failures, 1);
        engine.shutdown();
    }
    // Let the stopped worker release the queue
    tokio::time::sleep(Duration::from_millis(100)).await;

    let transport = Arc::new(CapturingTransport::default());
    let engine =
        TelemetryEngine::with_transport(test_config(&temp_dir), transport.clone(), "install-7")
            .unwrap();
    timeout(Duration::from_secs(5), engine.wait_for_attempts(1))
        .await
        .expect("startup upload did not run");

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    let names: Vec<&str> = batches[0].events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert_eq!(batches[0].events[1].value.as_deref(), Some("2"));
    assert!(batches[0].events[2].json.as_deref().unwrap().contains("nested"));
    assert!(!engine.queue().has_pending());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filesystem_transport_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let outbox = temp_dir.path().join("outbox");

    let mut config = test_config(&temp_dir);
    config.collector.transport = "filesystem".to_string();
    config.collector.compression = CompressionType::Zstd;
    config.collector.transport_config = TransportConfig::Filesystem {
        filesystem: FilesystemConfig {
            base_path: outbox.to_string_lossy().to_string(),
        },
    };

    let engine = TelemetryEngine::with_config(config, "install-fs").unwrap();
    for i in 0..5 {
        assert!(engine.log_event_value("counter", i.to_string()));
    }
    engine.force_upload();
    timeout(Duration::from_secs(5), engine.wait_for_attempts(1))
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(&outbox)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().ends_with(".pb.zst"));

    let batch = decode_batch(&std::fs::read(&files[0]).unwrap(), CompressionType::Zstd).unwrap();
    assert_eq!(batch.installation_id, "install-fs");
    let values: Vec<String> = batch
        .events
        .iter()
        .map(|e| e.value.clone().unwrap_or_default())
        .collect();
    assert_eq!(values, vec!["0", "1", "2", "3", "4"]);
}

#[test]
fn test_engine_runs_without_caller_runtime() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Arc::new(CapturingTransport::default());
    let engine =
        TelemetryEngine::with_transport(test_config(&temp_dir), transport.clone(), "install-sync")
            .unwrap();

    engine.log_event("from_plain_thread");
    engine.force_upload();

    // Poll: no runtime on this thread to await on
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while engine.status().scheduler.completed_attempts < 1 {
        assert!(std::time::Instant::now() < deadline, "upload did not complete");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(transport.batches()[0].events[0].name, "from_plain_thread");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logging_never_fails_loudly_on_bad_input() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Arc::new(CapturingTransport::default());
    let engine =
        TelemetryEngine::with_transport(test_config(&temp_dir), transport, "install-bad").unwrap();

    assert!(!engine.log_event(""));
    assert!(!engine.log_event_pairs("pairs", [("", "value")]));
    assert!(!engine.log_json_event("{broken"));
    assert!(engine.log_event("fine"));

    let status = engine.status();
    assert_eq!(status.recorded_events, 1);
    assert_eq!(status.dropped_events, 3);
}
