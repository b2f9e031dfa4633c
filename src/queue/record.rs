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

// Record framing: [payload len: u32 LE][crc32(payload): u32 LE][payload]

use crate::error::{Result, TelemetryError};
use std::io::{self, Read};

/// Size of the per-record frame header.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Largest accepted payload. Lengths above this are treated as corruption.
pub const MAX_RECORD_PAYLOAD: usize = 1024 * 1024;

/// Frame a payload for appending to a segment.
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(TelemetryError::InvalidEvent("empty record payload".to_string()));
    }
    if payload.len() > MAX_RECORD_PAYLOAD {
        return Err(TelemetryError::InvalidEvent(format!(
            "record payload of {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_RECORD_PAYLOAD
        )));
    }

    let mut frame = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Result of decoding one frame from a byte slice.
#[derive(Debug, PartialEq)]
pub enum DecodeOutcome<'a> {
    Complete { payload: &'a [u8], consumed: usize },
    /// Not enough bytes for a full frame (torn trailing write).
    Incomplete,
    /// Frame is present but fails validation.
    Corrupt(String),
}

fn parse_header(header: &[u8]) -> std::result::Result<(usize, u32), String> {
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len == 0 || len > MAX_RECORD_PAYLOAD {
        return Err(format!("invalid record length {}", len));
    }
    Ok((len, crc))
}

fn verify(payload: &[u8], expected: u32) -> std::result::Result<(), String> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        ));
    }
    Ok(())
}

/// Decode the frame at the start of `data`.
pub fn decode_record(data: &[u8]) -> DecodeOutcome<'_> {
    if data.len() < RECORD_HEADER_SIZE {
        return DecodeOutcome::Incomplete;
    }
    let (len, crc) = match parse_header(&data[..RECORD_HEADER_SIZE]) {
        Ok(header) => header,
        Err(detail) => return DecodeOutcome::Corrupt(detail),
    };
    let end = RECORD_HEADER_SIZE + len;
    if data.len() < end {
        return DecodeOutcome::Incomplete;
    }
    let payload = &data[RECORD_HEADER_SIZE..end];
    match verify(payload, crc) {
        Ok(()) => DecodeOutcome::Complete {
            payload,
            consumed: end,
        },
        Err(detail) => DecodeOutcome::Corrupt(detail),
    }
}

/// Result of reading one frame from a stream.
#[derive(Debug)]
pub enum ReadOutcome {
    Record(Vec<u8>),
    /// Clean end of stream on a frame boundary.
    End,
    Incomplete,
    Corrupt(String),
}

/// Read the next frame from `reader`.
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    let filled = read_full(reader, &mut header)?;
    if filled == 0 {
        return Ok(ReadOutcome::End);
    }
    if filled < RECORD_HEADER_SIZE {
        return Ok(ReadOutcome::Incomplete);
    }

    let (len, crc) = match parse_header(&header) {
        Ok(header) => header,
        Err(detail) => return Ok(ReadOutcome::Corrupt(detail)),
    };

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)? < len {
        return Ok(ReadOutcome::Incomplete);
    }

    match verify(&payload, crc) {
        Ok(()) => Ok(ReadOutcome::Record(payload)),
        Err(detail) => Ok(ReadOutcome::Corrupt(detail)),
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
