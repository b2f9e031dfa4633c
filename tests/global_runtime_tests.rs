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

// Process-wide engine set up from inside a short-lived runtime
//
// Kept in its own test binary: the global engine can only be set up once
// per process.

use std::time::Duration;
use telemetry_engine::config::{FilesystemConfig, TransportConfig};
use telemetry_engine::protocol::decode_batch;
use telemetry_engine::{global, CompressionType, TelemetryConfig};
use tempfile::TempDir;

#[test]
fn test_global_engine_outlives_setup_runtime() {
    let temp_dir = TempDir::new().unwrap();
    let outbox = temp_dir.path().join("outbox");

    let mut config = TelemetryConfig::new("http://unused", temp_dir.path().join("queue"));
    config.upload.upload_on_start = false;
    config.upload.interval_seconds = 3600;
    config.collector.transport = "filesystem".to_string();
    config.collector.compression = CompressionType::None;
    config.collector.transport_config = TransportConfig::Filesystem {
        filesystem: FilesystemConfig {
            base_path: outbox.to_string_lossy().to_string(),
        },
    };

    let setup_runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = setup_runtime
        .block_on(async { global::setup_with_config(config, "global-id") })
        .unwrap();
    drop(setup_runtime);

    assert!(global::log_event("after_runtime_dropped"));
    assert!(global::force_upload());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while engine.status().scheduler.completed_attempts < 1 {
        assert!(std::time::Instant::now() < deadline, "upload did not complete");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!engine.queue().has_pending());

    let files: Vec<_> = std::fs::read_dir(&outbox)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let batch = decode_batch(&std::fs::read(&files[0]).unwrap(), CompressionType::None).unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].name, "after_runtime_dropped");

    engine.shutdown();
}
