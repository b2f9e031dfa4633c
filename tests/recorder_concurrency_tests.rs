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

// Concurrent recording tests

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use telemetry_engine::config::QueueConfig;
use telemetry_engine::{Event, EventData, EventRecorder, PersistentQueue};
use tempfile::TempDir;

const THREADS: usize = 8;
const EVENTS_PER_THREAD: usize = 50;

fn open_queue(temp_dir: &TempDir) -> Arc<PersistentQueue> {
    Arc::new(
        PersistentQueue::open(QueueConfig {
            storage_dir: temp_dir.path().to_path_buf(),
            max_segment_bytes: 4096,
            sync_on_append: false,
            ..QueueConfig::default()
        })
        .unwrap(),
    )
}

#[test]
fn test_concurrent_recording_keeps_every_event() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open_queue(&temp_dir);
    let recorder = EventRecorder::new(queue.clone(), Arc::new(AtomicBool::new(false)));

    thread::scope(|scope| {
        for t in 0..THREADS {
            let recorder = &recorder;
            scope.spawn(move || {
                for i in 0..EVENTS_PER_THREAD {
                    recorder
                        .record_parts(
                            &format!("t{}-{}", t, i),
                            EventData::Pairs(vec![
                                ("thread".to_string(), t.to_string()),
                                ("index".to_string(), i.to_string()),
                            ]),
                        )
                        .unwrap();
                }
            });
        }
    });

    let events: Vec<Event> = queue
        .replay_from_checkpoint()
        .map(|record| Event::from_payload(&record.unwrap().payload).unwrap())
        .collect();

    assert_eq!(events.len(), THREADS * EVENTS_PER_THREAD);
    assert_eq!(recorder.stats(), ((THREADS * EVENTS_PER_THREAD) as u64, 0));

    let names: HashSet<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names.len(), THREADS * EVENTS_PER_THREAD);

    let sequences: HashSet<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences.len(), THREADS * EVENTS_PER_THREAD);

    // Each thread's events appear in the order that thread logged them
    for t in 0..THREADS {
        let thread_id = t.to_string();
        let indices: Vec<usize> = events
            .iter()
            .filter(|e| e.pairs()[0].1 == thread_id)
            .map(|e| e.pairs()[1].1.parse().unwrap())
            .collect();
        let expected: Vec<usize> = (0..EVENTS_PER_THREAD).collect();
        assert_eq!(indices, expected);
    }
}

#[test]
fn test_invalid_events_are_dropped_without_touching_queue() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open_queue(&temp_dir);
    let recorder = EventRecorder::new(queue.clone(), Arc::new(AtomicBool::new(true)));

    assert!(recorder.record_parts("", EventData::None).is_err());
    assert!(recorder.record_json("[1, 2, 3]").is_err());
    assert!(recorder.record_json("not json").is_err());
    assert!(recorder
        .record_json(r#"{"name": "device_info", "android_id": "abc"}"#)
        .is_ok());

    assert_eq!(recorder.stats(), (1, 3));
    let events: Vec<Event> = queue
        .replay_from_checkpoint()
        .map(|record| Event::from_payload(&record.unwrap().payload).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "device_info");
}
