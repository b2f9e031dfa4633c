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

// Wire format for upload batches
//
// One batch = one protobuf `WireBatch`, optionally compressed, sent as the
// body of a single request.

use crate::error::{Result, TelemetryError};
use crate::event::{Event, EventData};
use bytes::Bytes;
use flate2::write::GzEncoder;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Body compression
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Gzip,
    Zstd,
    Lz4,
}

impl CompressionType {
    /// Value for the `Content-Encoding` header, if any
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            CompressionType::None => None,
            CompressionType::Gzip => Some("gzip"),
            CompressionType::Zstd => Some("zstd"),
            CompressionType::Lz4 => Some("lz4"),
        }
    }

    /// File extension used by the filesystem transport
    pub fn extension(self) -> &'static str {
        match self {
            CompressionType::None => "pb",
            CompressionType::Gzip => "pb.gz",
            CompressionType::Zstd => "pb.zst",
            CompressionType::Lz4 => "pb.lz4",
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct WirePair {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireEvent {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub pairs: Vec<WirePair>,
    /// Serialized JSON object for envelope events
    #[prost(string, optional, tag = "4")]
    pub json: Option<String>,
    #[prost(int64, tag = "5")]
    pub timestamp_ms: i64,
    #[prost(uint64, tag = "6")]
    pub monotonic_ns: u64,
    #[prost(uint64, tag = "7")]
    pub sequence: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireBatch {
    #[prost(string, tag = "1")]
    pub installation_id: String,
    #[prost(int64, tag = "2")]
    pub sent_at_ms: i64,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<WireEvent>,
}

impl From<&Event> for WireEvent {
    fn from(event: &Event) -> Self {
        let mut wire = WireEvent {
            name: event.name.clone(),
            value: None,
            pairs: Vec::new(),
            json: None,
            timestamp_ms: event.timestamp.wall_ms,
            monotonic_ns: event.timestamp.monotonic_ns,
            sequence: event.sequence,
        };
        match &event.data {
            EventData::None => {}
            EventData::Value(value) => wire.value = Some(value.clone()),
            EventData::Pairs(pairs) => {
                wire.pairs = pairs
                    .iter()
                    .map(|(key, value)| WirePair {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
            }
            EventData::Json(value) => wire.json = Some(value.to_string()),
        }
        wire
    }
}

/// Encode and compress a batch into a request body
pub fn encode_batch(batch: &WireBatch, compression: CompressionType) -> Result<Bytes> {
    let raw = batch.encode_to_vec();
    let body = compress(raw, compression)?;
    Ok(Bytes::from(body))
}

/// Decompress and decode a request body
pub fn decode_batch(body: &[u8], compression: CompressionType) -> Result<WireBatch> {
    let raw = decompress(body, compression)?;
    WireBatch::decode(raw.as_slice()).map_err(|e| TelemetryError::Encoding(e.to_string()))
}

fn compress(data: Vec<u8>, compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data),
        CompressionType::Gzip => compress_gzip(&data),
        CompressionType::Zstd => compress_zstd(&data),
        CompressionType::Lz4 => compress_lz4(&data),
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| TelemetryError::Encoding(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| TelemetryError::Encoding(format!("gzip compression failed: {}", e)))
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 5)
        .map_err(|e| TelemetryError::Encoding(format!("zstd compression failed: {}", e)))
}

fn compress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(5)
        .build(Vec::new())
        .map_err(|e| TelemetryError::Encoding(format!("failed to create LZ4 encoder: {}", e)))?;

    encoder
        .write_all(data)
        .map_err(|e| TelemetryError::Encoding(format!("lz4 compression failed: {}", e)))?;

    let (compressed, result) = encoder.finish();
    result.map_err(|e| TelemetryError::Encoding(format!("lz4 compression failed: {}", e)))?;

    Ok(compressed)
}

fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let result = match compression {
        CompressionType::None => return Ok(data.to_vec()),
        CompressionType::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut out),
        CompressionType::Zstd => zstd::stream::read::Decoder::new(data)
            .and_then(|mut decoder| decoder.read_to_end(&mut out)),
        CompressionType::Lz4 => {
            lz4::Decoder::new(data).and_then(|mut decoder| decoder.read_to_end(&mut out))
        }
    };
    result.map_err(|e| TelemetryError::Encoding(format!("decompression failed: {}", e)))?;
    Ok(out)
}
