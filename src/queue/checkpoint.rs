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

// Durable upload checkpoint
//
// Layout (32 bytes): magic "TCKP" | version u32 | segment u64 | offset u64 | crc32 u32 | pad u32
// The file is replaced atomically: write checkpoint.tmp, fsync, rename, fsync dir.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

pub const CHECKPOINT_FILE: &str = "checkpoint";
pub const CHECKPOINT_TMP_FILE: &str = "checkpoint.tmp";

const MAGIC: &[u8; 4] = b"TCKP";
const VERSION: u32 = 1;
const ENCODED_SIZE: usize = 32;

/// A position in the queue: a segment id and a byte offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub segment: u64,
    pub offset: u64,
}

impl Position {
    pub fn new(segment: u64, offset: u64) -> Self {
        Self { segment, offset }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

fn encode(position: Position) -> [u8; ENCODED_SIZE] {
    let mut buf = [0u8; ENCODED_SIZE];
    buf[0..4].copy_from_slice(MAGIC);
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&position.segment.to_le_bytes());
    buf[16..24].copy_from_slice(&position.offset.to_le_bytes());
    let crc = crc32fast::hash(&buf[0..24]);
    buf[24..28].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn decode(data: &[u8]) -> Option<Position> {
    if data.len() != ENCODED_SIZE || &data[0..4] != MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(data[4..8].try_into().ok()?);
    if version != VERSION {
        return None;
    }
    let crc = u32::from_le_bytes(data[24..28].try_into().ok()?);
    if crc32fast::hash(&data[0..24]) != crc {
        return None;
    }
    Some(Position {
        segment: u64::from_le_bytes(data[8..16].try_into().ok()?),
        offset: u64::from_le_bytes(data[16..24].try_into().ok()?),
    })
}

/// Load the checkpoint, or `None` when it is absent or unreadable.
pub fn load(dir: &Path) -> Option<Position> {
    let path = dir.join(CHECKPOINT_FILE);
    match fs::read(&path) {
        Ok(data) => {
            let position = decode(&data);
            if position.is_none() {
                warn!(
                    "Ignoring unreadable checkpoint {} ({} bytes), replaying from oldest segment",
                    path.display(),
                    data.len()
                );
            }
            position
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read checkpoint {}: {}", path.display(), e);
            None
        }
    }
}

/// Atomically replace the checkpoint file.
pub fn store(dir: &Path, position: Position) -> io::Result<()> {
    let tmp_path = dir.join(CHECKPOINT_TMP_FILE);
    let final_path = dir.join(CHECKPOINT_FILE);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(&encode(position))?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    sync_dir(dir)
}

/// Remove a temp file left behind by a crash between write and rename.
pub fn remove_stale_tmp(dir: &Path) {
    let tmp_path = dir.join(CHECKPOINT_TMP_FILE);
    if tmp_path.exists() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            warn!("Failed to remove stale {}: {}", tmp_path.display(), e);
        }
    }
}

/// Fsync a directory so renames and new entries are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
