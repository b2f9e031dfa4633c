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

// Persistent queue module
//
// Crash-recoverable FIFO of serialized events:
// - append-only segment files, sealed once they reach a size threshold
// - a durable checkpoint marking the last acknowledged position
// - replay cursors reading from the checkpoint to the tail
// - deletion of acknowledged segments and purging past size limits
//
// The tail (append) and the head (checkpoint) are guarded by separate locks.
// Lock order: writer -> checkpoint -> sealed.

pub mod checkpoint;
pub mod cursor;
pub mod record;
pub mod segment;

pub use checkpoint::Position;
pub use cursor::{QueueRecord, ReplayCursor};

use crate::config::QueueConfig;
use crate::error::{Result, TelemetryError};
use record::encode_record;
use segment::{list_segments, segment_path, SegmentWriter, SEGMENT_HEADER_SIZE};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot of queue state
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub segments: usize,
    pub checkpoint: Position,
    pub tail: Position,
    pub pending_bytes: u64,
    pub total_bytes: u64,
    /// Bytes truncated from the tail during startup recovery
    pub recovered_discarded_bytes: u64,
    /// Segments deleted before acknowledgement to respect size limits
    pub purged_segments: u64,
}

pub struct PersistentQueue {
    dir: PathBuf,
    config: QueueConfig,

    // Tail: the segment receiving appends
    writer: Mutex<SegmentWriter>,
    current_segment: AtomicU64,

    // Head: last acknowledged position
    checkpoint: Mutex<Position>,

    // Sealed segment id -> length
    sealed: Mutex<BTreeMap<u64, u64>>,

    recovered_discarded_bytes: u64,
    purged_segments: AtomicU64,
}

impl PersistentQueue {
    /// Open the queue in `config.storage_dir`, running crash recovery.
    ///
    /// Fails with `StorageUnavailable` when the directory cannot be created,
    /// listed or written.
    pub fn open(config: QueueConfig) -> Result<Self> {
        let dir = config.storage_dir.clone();
        fs::create_dir_all(&dir).map_err(|e| TelemetryError::storage(&dir, e))?;
        checkpoint::remove_stale_tmp(&dir);

        let ids = list_segments(&dir).map_err(|e| TelemetryError::storage(&dir, e))?;

        let mut sealed = BTreeMap::new();
        let (writer, report) = match ids.split_last() {
            None => {
                let writer =
                    SegmentWriter::create(&dir, 1).map_err(|e| TelemetryError::storage(&dir, e))?;
                (writer, segment::ScanReport::default())
            }
            Some((&last, older)) => {
                for &id in older {
                    let len = fs::metadata(segment_path(&dir, id))
                        .map_err(|e| TelemetryError::storage(&dir, e))?
                        .len();
                    sealed.insert(id, len);
                }
                SegmentWriter::recover(&dir, last).map_err(|e| TelemetryError::storage(&dir, e))?
            }
        };

        if report.discarded_bytes > 0 {
            let corrupt = TelemetryError::RecordCorrupt {
                segment: writer.id(),
                offset: report.valid_len,
                detail: format!("{} trailing bytes discarded", report.discarded_bytes),
            };
            warn!("Queue recovery: {}", corrupt);
        }

        let oldest = sealed.keys().next().copied().unwrap_or(writer.id());
        let tail = writer.position();
        let checkpoint = match checkpoint::load(&dir) {
            None => Position::new(oldest, SEGMENT_HEADER_SIZE),
            Some(position) if position.segment < oldest => {
                warn!(
                    "Checkpoint {} precedes oldest segment {}, replaying from there",
                    position, oldest
                );
                Position::new(oldest, SEGMENT_HEADER_SIZE)
            }
            Some(position) if position > tail => {
                warn!(
                    "Checkpoint {} is past the recovered tail {}, clamping",
                    position, tail
                );
                tail
            }
            Some(position) => position,
        };

        let queue = Self {
            dir,
            config,
            current_segment: AtomicU64::new(writer.id()),
            writer: Mutex::new(writer),
            checkpoint: Mutex::new(checkpoint),
            sealed: Mutex::new(sealed),
            recovered_discarded_bytes: report.discarded_bytes,
            purged_segments: AtomicU64::new(0),
        };

        let normalized = queue.normalize(checkpoint);
        *lock(&queue.checkpoint) = normalized;
        queue.delete_acknowledged(normalized.segment);

        let status = queue.status();
        info!(
            "Opened queue at {}: {} segments, checkpoint {}, tail {}, {} bytes pending",
            queue.dir.display(),
            status.segments,
            status.checkpoint,
            status.tail,
            status.pending_bytes
        );

        Ok(queue)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one serialized event. Returns the position just past it.
    ///
    /// The record is fully written (and synced, if configured) before this
    /// returns; concurrent appends never interleave.
    pub fn append(&self, payload: &[u8]) -> Result<Position> {
        let frame = encode_record(payload)?;

        let mut writer = lock(&self.writer);
        if !writer.is_empty() && writer.len() + frame.len() as u64 > self.config.max_segment_bytes {
            self.roll(&mut writer)?;
        }

        let position = writer.append(&frame, self.config.sync_on_append)?;
        Ok(position)
    }

    /// Seal the current segment and start the next one.
    fn roll(&self, writer: &mut SegmentWriter) -> Result<()> {
        writer.sync()?;
        let next = SegmentWriter::create(&self.dir, writer.id() + 1)?;
        let old = std::mem::replace(writer, next);

        debug!("Sealed segment {} at {} bytes", old.id(), old.len());

        lock(&self.sealed).insert(old.id(), old.len());
        self.current_segment.store(writer.id(), Ordering::Release);
        self.enforce_limits(writer);
        Ok(())
    }

    /// Purge the oldest sealed segments until the queue fits its limits.
    /// Called with the writer lock held.
    fn enforce_limits(&self, writer: &SegmentWriter) {
        let mut purged = Vec::new();
        {
            let mut sealed = lock(&self.sealed);
            let mut total: u64 = sealed.values().sum::<u64>() + writer.len();
            while total > self.config.max_total_bytes || sealed.len() + 1 > self.config.max_segments {
                let Some((id, len)) = sealed.pop_first() else {
                    break;
                };
                total -= len;
                purged.push((id, len));
            }
        }

        if purged.is_empty() {
            return;
        }

        for (id, len) in &purged {
            warn!(
                "Purging segment {} ({} bytes) to stay within queue limits; unsent events are lost",
                id, len
            );
            self.remove_segment_file(*id);
        }
        self.purged_segments
            .fetch_add(purged.len() as u64, Ordering::Relaxed);

        // Move the checkpoint off any purged segment.
        let newest_purged = purged.last().map(|(id, _)| *id).unwrap_or_default();
        let mut checkpoint = lock(&self.checkpoint);
        if checkpoint.segment <= newest_purged {
            let oldest = lock(&self.sealed)
                .keys()
                .next()
                .copied()
                .unwrap_or(writer.id());
            let position = Position::new(oldest, SEGMENT_HEADER_SIZE);
            match checkpoint::store(&self.dir, position) {
                Ok(()) => *checkpoint = position,
                Err(e) => warn!("Failed to persist checkpoint after purge: {}", e),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_writer<R>(&self, f: impl FnOnce(&mut SegmentWriter) -> R) -> R {
        f(&mut lock(&self.writer))
    }

    /// Position just past the last appended record.
    pub fn tail(&self) -> Position {
        lock(&self.writer).position()
    }

    pub fn checkpoint(&self) -> Position {
        *lock(&self.checkpoint)
    }

    /// True when appended records exist past the checkpoint.
    pub fn has_pending(&self) -> bool {
        let tail = self.tail();
        self.checkpoint() < tail
    }

    /// Cursor over valid records after `from`, up to the current tail.
    pub fn open_replay_cursor(&self, from: Position) -> ReplayCursor {
        let tail = self.tail();
        let mut segments: Vec<u64> = lock(&self.sealed)
            .range(from.segment..)
            .map(|(id, _)| *id)
            .collect();
        if tail.segment >= from.segment {
            segments.push(tail.segment);
        }
        ReplayCursor::new(self.dir.clone(), from, tail, segments)
    }

    /// Cursor starting at the durable checkpoint.
    pub fn replay_from_checkpoint(&self) -> ReplayCursor {
        self.open_replay_cursor(self.checkpoint())
    }

    /// Durably move the checkpoint to `position` and delete segments that
    /// are now fully acknowledged.
    ///
    /// Positions at or before the current checkpoint are ignored, so a stale
    /// acknowledgement can never move the checkpoint backwards.
    pub fn advance_checkpoint(&self, position: Position) -> Result<()> {
        let normalized = self.normalize(position);
        {
            let mut checkpoint = lock(&self.checkpoint);
            if normalized <= *checkpoint {
                debug!(
                    "Ignoring checkpoint {} at or before current {}",
                    normalized, *checkpoint
                );
                return Ok(());
            }
            checkpoint::store(&self.dir, normalized)?;
            *checkpoint = normalized;
        }

        self.delete_acknowledged(normalized.segment);
        Ok(())
    }

    /// Map a position at the very end of a sealed segment to the start of
    /// the next segment.
    fn normalize(&self, position: Position) -> Position {
        let sealed = lock(&self.sealed);
        match sealed.get(&position.segment) {
            Some(&len) if position.offset >= len => {
                let next = sealed
                    .range(position.segment + 1..)
                    .next()
                    .map(|(id, _)| *id)
                    .unwrap_or_else(|| self.current_segment.load(Ordering::Acquire));
                Position::new(next, SEGMENT_HEADER_SIZE)
            }
            _ => position,
        }
    }

    /// Delete sealed segments entirely before `segment`.
    fn delete_acknowledged(&self, segment: u64) {
        let removed: Vec<u64> = {
            let mut sealed = lock(&self.sealed);
            let keep = sealed.split_off(&segment);
            let removed = sealed.keys().copied().collect();
            *sealed = keep;
            removed
        };

        for id in removed {
            debug!("Deleting acknowledged segment {}", id);
            self.remove_segment_file(id);
        }
    }

    fn remove_segment_file(&self, id: u64) {
        let path = segment_path(&self.dir, id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete segment {}: {}", path.display(), e);
            }
        }
    }

    pub fn status(&self) -> QueueStatus {
        let tail = self.tail();
        let checkpoint = self.checkpoint();
        let sealed = lock(&self.sealed).clone();

        let total_bytes = sealed.values().sum::<u64>() + tail.offset;
        let mut pending_bytes = 0;
        for (&id, &len) in sealed.iter().chain(std::iter::once((&tail.segment, &tail.offset))) {
            if id < checkpoint.segment {
                continue;
            }
            let start = if id == checkpoint.segment {
                checkpoint.offset
            } else {
                SEGMENT_HEADER_SIZE
            };
            pending_bytes += len.saturating_sub(start);
        }

        QueueStatus {
            segments: sealed.len() + 1,
            checkpoint,
            tail,
            pending_bytes,
            total_bytes,
            recovered_discarded_bytes: self.recovered_discarded_bytes,
            purged_segments: self.purged_segments.load(Ordering::Relaxed),
        }
    }
}
