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

// Lazy replay of queued records

use super::checkpoint::Position;
use super::record::{read_record, ReadOutcome, RECORD_HEADER_SIZE};
use super::segment::{segment_path, SEGMENT_HEADER_SIZE};
use crate::error::{Result, TelemetryError};
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::warn;

/// One valid record read back from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub start: Position,
    /// Position just past this record; the checkpoint value that acknowledges it.
    pub end: Position,
    pub payload: Vec<u8>,
}

impl QueueRecord {
    /// Framed size of the record on disk.
    pub fn framed_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

struct OpenSegment {
    id: u64,
    reader: BufReader<File>,
    offset: u64,
}

/// Ordered, finite iterator over the valid records between a start position
/// and the queue tail captured when the cursor was opened.
///
/// Records appended after the cursor was opened are not returned; open a new
/// cursor to see them.
pub struct ReplayCursor {
    dir: PathBuf,
    start: Position,
    tail: Position,
    segments: Vec<u64>,
    next_segment: usize,
    current: Option<OpenSegment>,
    done: bool,
}

impl ReplayCursor {
    pub(crate) fn new(dir: PathBuf, start: Position, tail: Position, segments: Vec<u64>) -> Self {
        Self {
            dir,
            start,
            tail,
            segments,
            next_segment: 0,
            current: None,
            done: start >= tail,
        }
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn tail(&self) -> Position {
        self.tail
    }

    fn open_next(&mut self) -> io::Result<bool> {
        while let Some(&id) = self.segments.get(self.next_segment) {
            self.next_segment += 1;

            let offset = if id == self.start.segment {
                self.start.offset.max(SEGMENT_HEADER_SIZE)
            } else {
                SEGMENT_HEADER_SIZE
            };

            let file = match File::open(segment_path(&self.dir, id)) {
                Ok(file) => file,
                // Purged or acknowledged while the cursor was open.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let mut reader = BufReader::new(file);
            reader.seek(SeekFrom::Start(offset))?;
            self.current = Some(OpenSegment { id, reader, offset });
            return Ok(true);
        }
        Ok(false)
    }

    fn limit_for(&self, segment: u64) -> u64 {
        if segment == self.tail.segment {
            self.tail.offset
        } else {
            u64::MAX
        }
    }
}

impl Iterator for ReplayCursor {
    type Item = Result<QueueRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if self.current.is_none() {
                match self.open_next() {
                    Ok(true) => {}
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(TelemetryError::storage(self.dir.clone(), e)));
                    }
                }
            }

            let (id, offset) = match &self.current {
                Some(segment) => (segment.id, segment.offset),
                None => continue,
            };

            let limit = self.limit_for(id);
            if offset >= limit {
                self.current = None;
                if id >= self.tail.segment {
                    self.done = true;
                }
                continue;
            }

            let outcome = match self.current.as_mut() {
                Some(segment) => read_record(&mut segment.reader),
                None => continue,
            };

            match outcome {
                Ok(ReadOutcome::Record(payload)) => {
                    let start = Position::new(id, offset);
                    let framed = (RECORD_HEADER_SIZE + payload.len()) as u64;
                    let end = Position::new(id, offset + framed);
                    if let Some(segment) = self.current.as_mut() {
                        segment.offset = end.offset;
                    }
                    return Some(Ok(QueueRecord {
                        start,
                        end,
                        payload,
                    }));
                }
                Ok(ReadOutcome::End) => {
                    self.current = None;
                    if id >= self.tail.segment {
                        self.done = true;
                    }
                }
                Ok(ReadOutcome::Incomplete) => {
                    warn!(
                        "Skipping partial record at the end of segment {} (offset {})",
                        id, offset
                    );
                    self.current = None;
                    self.done = id >= self.tail.segment;
                }
                Ok(ReadOutcome::Corrupt(detail)) => {
                    warn!(
                        "Skipping rest of segment {} after corrupt record at offset {}: {}",
                        id, offset, detail
                    );
                    self.current = None;
                    self.done = id >= self.tail.segment;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(TelemetryError::storage(self.dir.clone(), e)));
                }
            }
        }
    }
}
