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

// Event model and queue payload encoding

use crate::error::{Result, TelemetryError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// Name used for JSON envelopes that carry no `"name"` field.
pub const JSON_EVENT_NAME: &str = "json_event";

/// Payload attached to an event name.
///
/// A value and key/value pairs are mutually exclusive, so they live in
/// separate variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventData {
    #[default]
    None,
    Value(String),
    /// Ordered key/value pairs; insertion order is preserved on the wire.
    Pairs(Vec<(String, String)>),
    /// Pre-serialized structured payload (a JSON object).
    Json(serde_json::Value),
}

/// Capture time of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Wall clock, milliseconds since the Unix epoch.
    pub wall_ms: i64,
    /// Nanoseconds since the engine's process-local monotonic anchor.
    pub monotonic_ns: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        let anchor = process_anchor();
        Self {
            wall_ms: Utc::now().timestamp_millis(),
            monotonic_ns: u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX),
        }
    }
}

fn process_anchor() -> &'static Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now)
}

/// A recorded event. Never mutated after it has been appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub data: EventData,
    pub timestamp: Timestamp,
    /// Per-process counter used for local ordering only.
    pub sequence: u64,
}

impl Event {
    /// Build an event, rejecting an empty name.
    pub fn new(name: impl Into<String>, data: EventData, sequence: u64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TelemetryError::InvalidEvent(
                "event name must not be empty".to_string(),
            ));
        }
        if let EventData::Pairs(pairs) = &data {
            if pairs.iter().any(|(key, _)| key.is_empty()) {
                return Err(TelemetryError::InvalidEvent(format!(
                    "event '{}' has a pair with an empty key",
                    name
                )));
            }
        }
        Ok(Self {
            name,
            data,
            timestamp: Timestamp::now(),
            sequence,
        })
    }

    /// Build an event from a JSON object envelope.
    pub fn from_json_envelope(envelope: &str, sequence: u64) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(envelope)?;
        let object = value.as_object().ok_or_else(|| {
            TelemetryError::InvalidEvent("JSON envelope must be an object".to_string())
        })?;

        let name = match object.get("name") {
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(_) => {
                return Err(TelemetryError::InvalidEvent(
                    "JSON envelope field 'name' must be a string".to_string(),
                ))
            }
            None => JSON_EVENT_NAME.to_string(),
        };

        Self::new(name, EventData::Json(value), sequence)
    }

    /// Encode as a queue record payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn value(&self) -> Option<&str> {
        match &self.data {
            EventData::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        match &self.data {
            EventData::Pairs(pairs) => pairs,
            _ => &[],
        }
    }
}
