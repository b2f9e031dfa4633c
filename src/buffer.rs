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

use crate::event::Event;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Events kept in memory before the engine has a storage directory.
pub const DEFAULT_PENDING_CAPACITY: usize = 2048;

/// Bounded in-memory holding area for events recorded before setup.
///
/// When full, the oldest event is evicted to make room for the newest.
pub struct PendingBuffer {
    events: ArrayQueue<Event>,
    evicted: AtomicUsize,
}

impl PendingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: ArrayQueue::new(capacity.max(1)),
            evicted: AtomicUsize::new(0),
        }
    }

    /// Push an event, evicting the oldest one if the buffer is full
    pub fn push(&self, event: Event) {
        if let Some(evicted) = self.events.force_push(event) {
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "Pending buffer full, evicted event '{}' ({} evicted so far)",
                evicted.name, total
            );
        }
    }

    /// Remove and return all buffered events, oldest first
    pub fn drain(&self) -> Vec<Event> {
        let mut drained = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            drained.push(event);
        }

        let evicted = self.evicted.swap(0, Ordering::Relaxed);
        if evicted > 0 {
            warn!(
                "{} events were dropped from the pending buffer before setup",
                evicted
            );
        }
        drained
    }

    /// Get statistics: (buffered, evicted)
    pub fn stats(&self) -> (usize, usize) {
        (self.events.len(), self.evicted.load(Ordering::Relaxed))
    }
}

impl Default for PendingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;

    fn event(name: &str, sequence: u64) -> Event {
        Event::new(name, EventData::None, sequence).unwrap()
    }

    #[test]
    fn test_drain_preserves_order() {
        let buffer = PendingBuffer::new(8);
        buffer.push(event("first", 0));
        buffer.push(event("second", 1));

        let names: Vec<String> = buffer.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(buffer.stats(), (0, 0));
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let buffer = PendingBuffer::new(2);
        buffer.push(event("a", 0));
        buffer.push(event("b", 1));
        buffer.push(event("c", 2));

        assert_eq!(buffer.stats(), (2, 1));
        let names: Vec<String> = buffer.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
