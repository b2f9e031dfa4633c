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

// Embeddable client-side telemetry engine
//
// Host applications log named events from any thread. The engine:
// - Appends every event to a crash-safe, segmented on-disk queue
// - Uploads batches in the background over HTTP (or into a directory)
// - Advances a durable checkpoint only after the collector acknowledges
// - Retries failed uploads with exponential backoff
// - Keeps a stable per-install identifier

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod global;
pub mod identity;
pub mod protocol;
pub mod queue;
pub mod recorder;
pub mod scheduler;
pub mod transport;
pub mod uploader;

// Re-export main types
pub use buffer::PendingBuffer;
pub use config::{load_config, load_config_with_env, TelemetryConfig};
pub use engine::{EngineStatus, TelemetryEngine};
pub use error::{Result, TelemetryError};
pub use event::{Event, EventData, Timestamp};
pub use identity::{FileKeyValueStore, InstallationIdentity, KeyValueStore, MemoryKeyValueStore};
pub use protocol::{CompressionType, WireBatch, WireEvent, WirePair};
pub use queue::{PersistentQueue, Position, QueueRecord, QueueStatus, ReplayCursor};
pub use recorder::EventRecorder;
pub use scheduler::{Backoff, SchedulerState, SchedulerStatus, Trigger, UploadScheduler};
pub use transport::{FilesystemTransport, HttpTransport, Transport, TransportFactory};
pub use uploader::{BatchUploader, UploadOutcome, UploadReport};
