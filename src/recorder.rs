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

use crate::error::{Result, TelemetryError};
use crate::event::{Event, EventData};
use crate::queue::{PersistentQueue, Position};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Validates, stamps and appends events to the persistent queue.
///
/// Safe to call from any number of threads; only the queue append is
/// serialized. Never touches the network.
pub struct EventRecorder {
    queue: Arc<PersistentQueue>,
    sequence: AtomicU64,
    debug_mode: Arc<AtomicBool>,

    // Statistics
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl EventRecorder {
    pub fn new(queue: Arc<PersistentQueue>, debug_mode: Arc<AtomicBool>) -> Self {
        Self {
            queue,
            sequence: AtomicU64::new(0),
            debug_mode,
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Next value of the per-process sequence counter.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Build and record an event from its parts.
    pub fn record_parts(&self, name: &str, data: EventData) -> Result<Position> {
        let event = match Event::new(name, data, self.next_sequence()) {
            Ok(event) => event,
            Err(e) => return Err(self.drop_event(name, e)),
        };
        self.record(&event)
    }

    /// Record a JSON object envelope.
    pub fn record_json(&self, envelope: &str) -> Result<Position> {
        let event = match Event::from_json_envelope(envelope, self.next_sequence()) {
            Ok(event) => event,
            Err(e) => return Err(self.drop_event("<json>", e)),
        };
        self.record(&event)
    }

    /// Serialize and durably append an already built event.
    pub fn record(&self, event: &Event) -> Result<Position> {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => return Err(self.drop_event(&event.name, e)),
        };

        match self.queue.append(&payload) {
            Ok(position) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                if self.debug_mode.load(Ordering::Relaxed) {
                    debug!(
                        "Recorded event '{}' (seq {}, {} bytes) at {}",
                        event.name,
                        event.sequence,
                        payload.len(),
                        position
                    );
                }
                Ok(position)
            }
            Err(e) => Err(self.drop_event(&event.name, e)),
        }
    }

    fn drop_event(&self, name: &str, error: TelemetryError) -> TelemetryError {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("Dropping event '{}': {}", name, error);
        error
    }

    /// Get statistics: (recorded, dropped)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.recorded.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}
