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

// Process-wide engine instance
//
// Events logged before `setup` are held in a bounded in-memory buffer and
// recorded, oldest first, once the engine exists.

use crate::buffer::PendingBuffer;
use crate::config::TelemetryConfig;
use crate::engine::TelemetryEngine;
use crate::error::Result;
use crate::event::{Event, EventData};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

static ENGINE: OnceLock<TelemetryEngine> = OnceLock::new();
static PENDING: OnceLock<PendingBuffer> = OnceLock::new();
static PENDING_SEQUENCE: AtomicU64 = AtomicU64::new(0);
static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

// Serializes setup against buffering so no event lands in the buffer after
// it has been drained.
static SETUP_LOCK: Mutex<()> = Mutex::new(());

fn setup_lock() -> MutexGuard<'static, ()> {
    SETUP_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pending() -> &'static PendingBuffer {
    PENDING.get_or_init(PendingBuffer::default)
}

/// Set up the process-wide engine with default settings.
///
/// Repeated calls return the existing engine and ignore their arguments.
pub fn setup(
    server_url: &str,
    storage_dir: impl Into<PathBuf>,
    installation_id: &str,
) -> Result<&'static TelemetryEngine> {
    setup_with_config(TelemetryConfig::new(server_url, storage_dir), installation_id)
}

pub fn setup_with_config(
    mut config: TelemetryConfig,
    installation_id: &str,
) -> Result<&'static TelemetryEngine> {
    let _guard = setup_lock();
    if let Some(engine) = ENGINE.get() {
        debug!("Telemetry engine already set up, ignoring repeated setup");
        return Ok(engine);
    }

    if DEBUG_MODE.load(Ordering::Relaxed) {
        config.logging.debug_mode = true;
    }
    // The engine lives for the whole process, longer than any runtime the
    // caller might be on
    let engine = TelemetryEngine::with_config_owned_runtime(config, installation_id)?;

    let buffered = pending().drain();
    if !buffered.is_empty() {
        info!("Recording {} events logged before setup", buffered.len());
    }
    for event in buffered {
        engine.record_buffered(event);
    }

    Ok(ENGINE.get_or_init(|| engine))
}

/// The engine, once `setup` has succeeded.
pub fn engine() -> Option<&'static TelemetryEngine> {
    ENGINE.get()
}

pub fn log_event(name: &str) -> bool {
    log(name, EventData::None)
}

pub fn log_event_value(name: &str, value: impl Into<String>) -> bool {
    log(name, EventData::Value(value.into()))
}

pub fn log_event_pairs<I, K, V>(name: &str, pairs: I) -> bool
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let pairs = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    log(name, EventData::Pairs(pairs))
}

pub fn log_json_event(envelope: &str) -> bool {
    record_or_buffer(
        |engine| engine.log_json_event(envelope),
        |sequence| Event::from_json_envelope(envelope, sequence),
    )
}

pub fn log(name: &str, data: EventData) -> bool {
    if let Some(engine) = ENGINE.get() {
        return engine.log(name, data);
    }
    record_or_buffer(
        |engine| engine.log(name, data.clone()),
        |sequence| Event::new(name, data.clone(), sequence),
    )
}

fn record_or_buffer(
    record: impl FnOnce(&TelemetryEngine) -> bool,
    build: impl FnOnce(u64) -> Result<Event>,
) -> bool {
    if let Some(engine) = ENGINE.get() {
        return record(engine);
    }

    let _guard = setup_lock();
    if let Some(engine) = ENGINE.get() {
        return record(engine);
    }

    match build(PENDING_SEQUENCE.fetch_add(1, Ordering::Relaxed)) {
        Ok(event) => {
            if DEBUG_MODE.load(Ordering::Relaxed) {
                debug!("Buffering event '{}' until setup", event.name);
            }
            pending().push(event);
            true
        }
        Err(e) => {
            warn!("Dropping event logged before setup: {}", e);
            false
        }
    }
}

/// Request an upload now. Returns false before setup.
pub fn force_upload() -> bool {
    match ENGINE.get() {
        Some(engine) => {
            engine.force_upload();
            true
        }
        None => {
            debug!("force_upload called before setup");
            false
        }
    }
}

pub fn on_app_paused() {
    if let Some(engine) = ENGINE.get() {
        engine.on_app_paused();
    }
}

pub fn on_app_resumed() {
    if let Some(engine) = ENGINE.get() {
        engine.on_app_resumed();
    }
}

pub fn on_network_reconnected() {
    if let Some(engine) = ENGINE.get() {
        engine.on_network_reconnected();
    }
}

/// Toggle verbose diagnostics. May be called before setup.
pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
    if let Some(engine) = ENGINE.get() {
        engine.set_debug_mode(enabled);
    }
}
