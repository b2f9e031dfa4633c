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

use crate::config::UploadConfig;
use crate::error::{Result, TelemetryError};
use crate::event::Event;
use crate::protocol::{encode_batch, CompressionType, WireBatch, WireEvent};
use crate::queue::{PersistentQueue, Position};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one successful upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Nothing was pending
    Empty,
    Uploaded(UploadReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub events: usize,
    pub body_bytes: usize,
    /// Checkpoint after the acknowledgement
    pub checkpoint: Position,
    /// The batch stopped at a size limit, so more data is waiting
    pub more_pending: bool,
}

struct PendingBatch {
    events: Vec<WireEvent>,
    end: Option<Position>,
    limited: bool,
}

/// Reads one batch from the checkpoint, sends it, and advances the
/// checkpoint past exactly the records that were sent.
pub struct BatchUploader {
    queue: Arc<PersistentQueue>,
    transport: Arc<dyn Transport>,
    installation_id: String,
    compression: CompressionType,
    max_batch_events: usize,
    max_batch_bytes: usize,
    debug_mode: Arc<AtomicBool>,
}

impl BatchUploader {
    pub fn new(
        queue: Arc<PersistentQueue>,
        transport: Arc<dyn Transport>,
        installation_id: String,
        compression: CompressionType,
        config: &UploadConfig,
        debug_mode: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            transport,
            installation_id,
            compression,
            max_batch_events: config.max_batch_events.max(1),
            max_batch_bytes: config.max_batch_bytes.max(1),
            debug_mode,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run one upload attempt.
    ///
    /// On any error the checkpoint is left untouched and the same records
    /// are read again by the next attempt.
    pub async fn upload_once(&self) -> Result<UploadOutcome> {
        let batch = self.read_batch().await?;

        let Some(end) = batch.end else {
            return Ok(UploadOutcome::Empty);
        };

        if batch.events.is_empty() {
            // Only undecodable records; acknowledge them locally.
            self.advance_checkpoint(end).await?;
            return Ok(UploadOutcome::Empty);
        }

        let event_count = batch.events.len();
        let wire = WireBatch {
            installation_id: self.installation_id.clone(),
            sent_at_ms: Utc::now().timestamp_millis(),
            events: batch.events,
        };
        let body = encode_batch(&wire, self.compression)?;
        let body_bytes = body.len();

        if self.debug_mode.load(Ordering::Relaxed) {
            debug!(
                "Uploading {} events ({} bytes) via {} transport",
                event_count,
                body_bytes,
                self.transport.transport_type()
            );
        }

        self.transport.send(body).await?;
        self.advance_checkpoint(end).await?;

        info!(
            "Uploaded {} events ({} bytes), checkpoint now {}",
            event_count, body_bytes, end
        );

        Ok(UploadOutcome::Uploaded(UploadReport {
            events: event_count,
            body_bytes,
            checkpoint: self.queue.checkpoint(),
            more_pending: batch.limited,
        }))
    }

    // Segment reads and checkpoint fsyncs stay off the async worker threads

    async fn read_batch(&self) -> Result<PendingBatch> {
        let queue = self.queue.clone();
        let (max_events, max_bytes) = (self.max_batch_events, self.max_batch_bytes);
        tokio::task::spawn_blocking(move || read_batch(&queue, max_events, max_bytes))
            .await
            .map_err(|e| TelemetryError::Runtime(e.to_string()))?
    }

    async fn advance_checkpoint(&self, end: Position) -> Result<()> {
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.advance_checkpoint(end))
            .await
            .map_err(|e| TelemetryError::Runtime(e.to_string()))?
    }
}

/// Collect records from the checkpoint up to the count or byte budget,
/// whichever is reached first.
fn read_batch(
    queue: &PersistentQueue,
    max_events: usize,
    max_bytes: usize,
) -> Result<PendingBatch> {
    let mut batch = PendingBatch {
        events: Vec::new(),
        end: None,
        limited: false,
    };
    let mut bytes = 0usize;

    for record in queue.replay_from_checkpoint() {
        let record = record?;
        let framed_len = record.framed_len();

        let full = batch.events.len() >= max_events
            || (batch.end.is_some() && bytes + framed_len > max_bytes);
        if full {
            batch.limited = true;
            break;
        }

        match Event::from_payload(&record.payload) {
            Ok(event) => batch.events.push(WireEvent::from(&event)),
            Err(e) => warn!("Skipping undecodable record at {}: {}", record.start, e),
        }
        bytes += framed_len;
        batch.end = Some(record.end);
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::event::EventData;
    use crate::protocol::decode_batch;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CapturingTransport {
        fail: AtomicBool,
        bodies: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send(&self, body: Bytes) -> Result<()> {
            self.bodies.lock().unwrap().push(body);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TelemetryError::DeliveryFailure("stub failure".to_string()));
            }
            Ok(())
        }

        fn transport_type(&self) -> &str {
            "capture"
        }
    }

    fn setup(max_events: usize) -> (BatchUploader, Arc<PersistentQueue>, Arc<CapturingTransport>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(
            PersistentQueue::open(QueueConfig {
                storage_dir: temp_dir.path().to_path_buf(),
                ..QueueConfig::default()
            })
            .unwrap(),
        );
        let transport = Arc::new(CapturingTransport::default());
        let config = UploadConfig {
            max_batch_events: max_events,
            ..UploadConfig::default()
        };
        let uploader = BatchUploader::new(
            queue.clone(),
            transport.clone(),
            "install-1".to_string(),
            CompressionType::None,
            &config,
            Arc::new(AtomicBool::new(false)),
        );
        (uploader, queue, transport, temp_dir)
    }

    fn append(queue: &PersistentQueue, name: &str, seq: u64) -> Position {
        let event = Event::new(name, EventData::None, seq).unwrap();
        queue.append(&event.to_payload().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let (uploader, _queue, transport, _temp_dir) = setup(10);
        assert_eq!(uploader.upload_once().await.unwrap(), UploadOutcome::Empty);
        assert!(transport.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_respects_event_limit() {
        let (uploader, queue, transport, _temp_dir) = setup(2);
        let mut ends = Vec::new();
        for i in 0..3 {
            ends.push(append(&queue, &format!("e{}", i), i));
        }

        match uploader.upload_once().await.unwrap() {
            UploadOutcome::Uploaded(report) => {
                assert_eq!(report.events, 2);
                assert!(report.more_pending);
                assert_eq!(report.checkpoint, ends[1]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        match uploader.upload_once().await.unwrap() {
            UploadOutcome::Uploaded(report) => {
                assert_eq!(report.events, 1);
                assert!(!report.more_pending);
                assert_eq!(report.checkpoint, queue.tail());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let bodies = transport.bodies.lock().unwrap();
        let last = decode_batch(&bodies[1], CompressionType::None).unwrap();
        assert_eq!(last.installation_id, "install-1");
        assert_eq!(last.events[0].name, "e2");
    }

    #[tokio::test]
    async fn test_failed_send_keeps_checkpoint() {
        let (uploader, queue, transport, _temp_dir) = setup(10);
        append(&queue, "a", 0);
        append(&queue, "b", 1);
        let before = queue.checkpoint();

        transport.fail.store(true, Ordering::SeqCst);
        assert!(uploader.upload_once().await.is_err());
        assert_eq!(queue.checkpoint(), before);

        transport.fail.store(false, Ordering::SeqCst);
        uploader.upload_once().await.unwrap();

        // Same records were sent twice: at-least-once
        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 2);
        let first = decode_batch(&bodies[0], CompressionType::None).unwrap();
        let second = decode_batch(&bodies[1], CompressionType::None).unwrap();
        let names = |b: &WireBatch| b.events.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));
    }

    #[tokio::test]
    async fn test_undecodable_records_are_skipped() {
        let (uploader, queue, transport, _temp_dir) = setup(10);
        queue.append(b"not an event").unwrap();
        append(&queue, "good", 0);

        match uploader.upload_once().await.unwrap() {
            UploadOutcome::Uploaded(report) => assert_eq!(report.events, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!queue.has_pending());
        assert_eq!(transport.bodies.lock().unwrap().len(), 1);
    }
}
