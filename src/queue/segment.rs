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

// Append-only segment files

use super::checkpoint::{sync_dir, Position};
use super::record::{decode_record, DecodeOutcome};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Segment header: magic "TSEG" followed by a u32 format version.
pub const SEGMENT_HEADER: [u8; 8] = [b'T', b'S', b'E', b'G', 1, 0, 0, 0];
pub const SEGMENT_HEADER_SIZE: u64 = SEGMENT_HEADER.len() as u64;

const SEGMENT_EXTENSION: &str = "seg";

pub fn segment_file_name(id: u64) -> String {
    format!("{:020}.{}", id, SEGMENT_EXTENSION)
}

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_file_name(id))
}

fn parse_segment_id(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Segment ids present in `dir`, oldest first.
pub fn list_segments(dir: &Path) -> io::Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Outcome of the startup scan of the last segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub records: u64,
    pub valid_len: u64,
    /// Bytes cut from the tail (partial or corrupt trailing data).
    pub discarded_bytes: u64,
}

/// Writer for the segment currently receiving appends.
pub struct SegmentWriter {
    id: u64,
    path: PathBuf,
    file: File,
    len: u64,
}

impl SegmentWriter {
    /// Create a fresh segment containing only the header.
    pub fn create(dir: &Path, id: u64) -> io::Result<Self> {
        let path = segment_path(dir, id);
        let mut file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&SEGMENT_HEADER)?;
        file.sync_all()?;
        sync_dir(dir)?;

        debug!("Created segment {}", path.display());

        Ok(Self {
            id,
            path,
            file,
            len: SEGMENT_HEADER_SIZE,
        })
    }

    /// Open an existing segment as the tail, truncating any torn or corrupt
    /// trailing bytes first.
    pub fn recover(dir: &Path, id: u64) -> io::Result<(Self, ScanReport)> {
        let path = segment_path(dir, id);
        let data = fs::read(&path)?;

        if data.len() < SEGMENT_HEADER.len() || data[..SEGMENT_HEADER.len()] != SEGMENT_HEADER {
            warn!(
                "Segment {} has a missing or invalid header, discarding {} bytes",
                path.display(),
                data.len()
            );
            let mut file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(0)?;
            file.write_all(&SEGMENT_HEADER)?;
            file.sync_all()?;
            let file = OpenOptions::new().append(true).open(&path)?;
            let report = ScanReport {
                records: 0,
                valid_len: SEGMENT_HEADER_SIZE,
                discarded_bytes: data.len() as u64,
            };
            return Ok((
                Self {
                    id,
                    path,
                    file,
                    len: SEGMENT_HEADER_SIZE,
                },
                report,
            ));
        }

        let mut offset = SEGMENT_HEADER.len();
        let mut records = 0u64;
        loop {
            if offset == data.len() {
                break;
            }
            match decode_record(&data[offset..]) {
                DecodeOutcome::Complete { consumed, .. } => {
                    offset += consumed;
                    records += 1;
                }
                DecodeOutcome::Incomplete => {
                    warn!(
                        "Truncating partial record in {} at byte offset {}",
                        path.display(),
                        offset
                    );
                    break;
                }
                DecodeOutcome::Corrupt(detail) => {
                    warn!(
                        "Truncating corrupt record in {} at byte offset {}: {}",
                        path.display(),
                        offset,
                        detail
                    );
                    break;
                }
            }
        }

        let valid_len = offset as u64;
        let discarded_bytes = data.len() as u64 - valid_len;
        if discarded_bytes > 0 {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((
            Self {
                id,
                path,
                file,
                len: valid_len,
            },
            ScanReport {
                records,
                valid_len,
                discarded_bytes,
            },
        ))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when only the header has been written.
    pub fn is_empty(&self) -> bool {
        self.len <= SEGMENT_HEADER_SIZE
    }

    /// Position just past the last record.
    pub fn position(&self) -> Position {
        Position::new(self.id, self.len)
    }

    /// Append one framed record with a single write, returning the position
    /// just past it. A failed write is rolled back so no partial frame is
    /// left between valid records.
    pub fn append(&mut self, frame: &[u8], sync: bool) -> io::Result<Position> {
        let result = self.file.write_all(frame).and_then(|_| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = result {
            // Truncate through the path; the handle may be what failed
            let rollback = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .and_then(|file| file.set_len(self.len));
            if let Err(rollback) = rollback {
                warn!(
                    "Failed to roll back partial append in {}: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(e);
        }

        self.len += frame.len() as u64;
        Ok(self.position())
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) -> File {
        std::mem::replace(&mut self.file, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::record::encode_record;
    use tempfile::TempDir;

    #[test]
    fn test_segment_names_sort_numerically() {
        assert_eq!(segment_file_name(7), "00000000000000000007.seg");
        assert_eq!(parse_segment_id("00000000000000000007.seg"), Some(7));
        assert_eq!(parse_segment_id("checkpoint"), None);
        assert_eq!(parse_segment_id("abc.seg"), None);
        assert_eq!(parse_segment_id(".seg"), None);
    }

    #[test]
    fn test_list_segments_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        SegmentWriter::create(temp_dir.path(), 3).unwrap();
        SegmentWriter::create(temp_dir.path(), 1).unwrap();
        fs::write(temp_dir.path().join("checkpoint"), b"x").unwrap();

        assert_eq!(list_segments(temp_dir.path()).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_append_advances_position() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(temp_dir.path(), 1).unwrap();
        assert!(writer.is_empty());

        let frame = encode_record(b"abc").unwrap();
        let position = writer.append(&frame, true).unwrap();
        assert_eq!(position, Position::new(1, SEGMENT_HEADER_SIZE + frame.len() as u64));
        assert!(!writer.is_empty());
    }

    #[test]
    fn test_recover_truncates_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(temp_dir.path(), 1).unwrap();
        writer.append(&encode_record(b"first").unwrap(), true).unwrap();
        let end = writer.append(&encode_record(b"second").unwrap(), true).unwrap();
        drop(writer);

        let torn = encode_record(b"third").unwrap();
        let path = segment_path(temp_dir.path(), 1);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn[..torn.len() - 2]).unwrap();
        drop(file);

        let (writer, report) = SegmentWriter::recover(temp_dir.path(), 1).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.discarded_bytes, torn.len() as u64 - 2);
        assert_eq!(writer.position(), end);
        assert_eq!(fs::metadata(&path).unwrap().len(), end.offset);
    }

    #[test]
    fn test_failed_append_rolls_back_partial_frame() {
        let temp_dir = TempDir::new().unwrap();
        let path = segment_path(temp_dir.path(), 1);
        let mut writer = SegmentWriter::create(temp_dir.path(), 1).unwrap();
        let end = writer.append(&encode_record(b"first").unwrap(), true).unwrap();

        // Half a frame reached the disk before the write failed
        let partial = encode_record(b"lost").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..5]).unwrap();
        drop(file);

        let writable = writer.replace_file(File::open(&path).unwrap());
        assert!(writer.append(&partial, true).is_err());
        assert_eq!(writer.position(), end);
        assert_eq!(fs::metadata(&path).unwrap().len(), end.offset);

        writer.replace_file(writable);
        let third = encode_record(b"third").unwrap();
        let after = writer.append(&third, true).unwrap();
        assert_eq!(after.offset, end.offset + third.len() as u64);
        drop(writer);

        let (writer, report) = SegmentWriter::recover(temp_dir.path(), 1).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.discarded_bytes, 0);
        assert_eq!(writer.position(), after);
    }

    #[test]
    fn test_recover_rewrites_bad_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = segment_path(temp_dir.path(), 4);
        fs::write(&path, b"TS").unwrap();

        let (writer, report) = SegmentWriter::recover(temp_dir.path(), 4).unwrap();
        assert_eq!(report.discarded_bytes, 2);
        assert!(writer.is_empty());
        assert_eq!(fs::read(&path).unwrap(), SEGMENT_HEADER.to_vec());
    }
}
