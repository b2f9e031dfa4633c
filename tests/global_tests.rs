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

// Process-wide engine: buffering before setup and idempotent setup
//
// The global engine lives for the whole test process, so everything is
// exercised from a single test.

use std::time::Duration;
use telemetry_engine::config::{FilesystemConfig, TransportConfig};
use telemetry_engine::protocol::decode_batch;
use telemetry_engine::{global, CompressionType, TelemetryConfig};
use tempfile::TempDir;

#[test]
fn test_global_engine_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let outbox = temp_dir.path().join("outbox");

    // Before setup: buffered, uploads refused
    assert!(global::engine().is_none());
    assert!(global::log_event("before_setup"));
    assert!(global::log_event_pairs("early_pairs", [("k", "v")]));
    assert!(!global::log_event(""));
    assert!(!global::force_upload());
    global::set_debug_mode(true);

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

    let engine = global::setup_with_config(config, "global-id").unwrap();
    assert!(engine.debug_mode());
    assert_eq!(engine.status().recorded_events, 2);

    // Repeated setup keeps the first engine
    let again = global::setup("http://other", temp_dir.path().join("other"), "other-id").unwrap();
    assert!(std::ptr::eq(engine, again));
    assert_eq!(again.installation_id(), "global-id");

    assert!(global::log_json_event(r#"{"name": "after_setup"}"#));
    assert!(global::force_upload());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while engine.status().scheduler.completed_attempts < 1 {
        assert!(std::time::Instant::now() < deadline, "upload did not complete");
        std::thread::sleep(Duration::from_millis(10));
    }

    let files: Vec<_> = std::fs::read_dir(&outbox)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let batch = decode_batch(&std::fs::read(&files[0]).unwrap(), CompressionType::None).unwrap();
    let names: Vec<&str> = batch.events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["before_setup", "early_pairs", "after_setup"]);
    assert_eq!(batch.installation_id, "global-id");

    engine.shutdown();
}
