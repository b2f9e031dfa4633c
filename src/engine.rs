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

use crate::config::{ConfigLoader, TelemetryConfig};
use crate::error::{Result, TelemetryError};
use crate::event::{Event, EventData};
use crate::queue::{PersistentQueue, QueueStatus};
use crate::recorder::EventRecorder;
use crate::scheduler::{SchedulerStatus, Trigger, UploadScheduler};
use crate::transport::{Transport, TransportFactory};
use crate::uploader::BatchUploader;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

/// Snapshot of the whole engine, mostly for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub installation_id: String,
    pub recorded_events: u64,
    pub dropped_events: u64,
    pub debug_mode: bool,
    pub queue: QueueStatus,
    pub scheduler: SchedulerStatus,
}

/// The engine: durable recording on the caller's thread, uploads in the
/// background.
///
/// Logging calls never block on the network and never panic; failures are
/// reported as `false` and logged.
pub struct TelemetryEngine {
    config: TelemetryConfig,
    queue: Arc<PersistentQueue>,
    recorder: EventRecorder,
    scheduler: UploadScheduler,
    installation_id: String,
    debug_mode: Arc<AtomicBool>,

    // Present only when no tokio runtime was available at setup
    runtime: Option<Runtime>,
}

impl TelemetryEngine {
    /// Engine with default settings, uploading over HTTP to `server_url`.
    pub fn setup(
        server_url: &str,
        storage_dir: impl Into<PathBuf>,
        installation_id: &str,
    ) -> Result<Self> {
        Self::with_config(TelemetryConfig::new(server_url, storage_dir), installation_id)
    }

    /// Engine with the transport described by `config.collector`.
    pub fn with_config(config: TelemetryConfig, installation_id: &str) -> Result<Self> {
        let transport = Self::configured_transport(&config)?;
        Self::with_transport(config, transport, installation_id)
    }

    /// Like `with_config`, but uploads always run on a runtime owned by the
    /// engine, so the engine outlives whatever runtime the caller is on.
    pub fn with_config_owned_runtime(
        config: TelemetryConfig,
        installation_id: &str,
    ) -> Result<Self> {
        let transport = Self::configured_transport(&config)?;
        Self::build(config, transport, installation_id, RuntimeChoice::Owned)
    }

    fn configured_transport(config: &TelemetryConfig) -> Result<Arc<dyn Transport>> {
        ConfigLoader::validate(config).map_err(|e| TelemetryError::Config(format!("{:#}", e)))?;
        TransportFactory::create(&config.collector)
            .map_err(|e| TelemetryError::Config(format!("{:#}", e)))
    }

    /// Engine with an embedder-supplied transport.
    ///
    /// Fails only when the storage directory is unusable or no runtime can
    /// be started for background uploads.
    pub fn with_transport(
        config: TelemetryConfig,
        transport: Arc<dyn Transport>,
        installation_id: &str,
    ) -> Result<Self> {
        Self::build(config, transport, installation_id, RuntimeChoice::Ambient)
    }

    fn build(
        config: TelemetryConfig,
        transport: Arc<dyn Transport>,
        installation_id: &str,
        runtime_choice: RuntimeChoice,
    ) -> Result<Self> {
        let debug_mode = Arc::new(AtomicBool::new(config.logging.debug_mode));
        let queue = Arc::new(PersistentQueue::open(config.queue.clone())?);
        let (handle, runtime) = acquire_runtime(runtime_choice)?;

        if installation_id.is_empty() {
            warn!("Installation id is empty; uploaded batches will be anonymous");
        }

        let uploader = Arc::new(BatchUploader::new(
            queue.clone(),
            transport.clone(),
            installation_id.to_string(),
            config.collector.compression,
            &config.upload,
            debug_mode.clone(),
        ));
        let scheduler = UploadScheduler::start(
            uploader,
            &config.upload,
            &config.backoff,
            debug_mode.clone(),
            &handle,
        );
        let recorder = EventRecorder::new(queue.clone(), debug_mode.clone());

        if config.upload.upload_on_start && queue.has_pending() {
            info!("Recovered events pending from a previous run, scheduling upload");
            scheduler.trigger(Trigger::Startup);
        }

        info!(
            "Telemetry engine ready: storage={}, transport={}, owned_runtime={}",
            queue.dir().display(),
            transport.transport_type(),
            runtime.is_some()
        );

        Ok(Self {
            config,
            queue,
            recorder,
            scheduler,
            installation_id: installation_id.to_string(),
            debug_mode,
            runtime,
        })
    }

    /// Record an event with no payload.
    pub fn log_event(&self, name: &str) -> bool {
        self.log(name, EventData::None)
    }

    /// Record an event with a single value.
    pub fn log_event_value(&self, name: &str, value: impl Into<String>) -> bool {
        self.log(name, EventData::Value(value.into()))
    }

    /// Record an event with ordered key/value pairs.
    pub fn log_event_pairs<I, K, V>(&self, name: &str, pairs: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.log(name, EventData::Pairs(pairs))
    }

    /// Record a JSON object envelope; its `"name"` field names the event.
    pub fn log_json_event(&self, envelope: &str) -> bool {
        self.recorder.record_json(envelope).is_ok()
    }

    pub fn log(&self, name: &str, data: EventData) -> bool {
        self.recorder.record_parts(name, data).is_ok()
    }

    /// Record an event captured before this engine existed, keeping its
    /// capture time but restamping the sequence.
    pub(crate) fn record_buffered(&self, mut event: Event) -> bool {
        event.sequence = self.recorder.next_sequence();
        self.recorder.record(&event).is_ok()
    }

    /// Request an upload attempt now.
    pub fn force_upload(&self) {
        self.trigger(Trigger::Manual);
    }

    pub fn on_app_paused(&self) {
        self.trigger(Trigger::AppPaused);
    }

    pub fn on_app_resumed(&self) {
        self.trigger(Trigger::AppResumed);
    }

    pub fn on_network_reconnected(&self) {
        self.trigger(Trigger::NetworkReconnected);
    }

    pub fn trigger(&self, trigger: Trigger) {
        if self.debug_mode() {
            debug!("Upload trigger: {:?}", trigger);
        }
        self.scheduler.trigger(trigger);
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
        info!("Telemetry debug mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn queue(&self) -> &PersistentQueue {
        &self.queue
    }

    pub fn status(&self) -> EngineStatus {
        let (recorded_events, dropped_events) = self.recorder.stats();
        EngineStatus {
            installation_id: self.installation_id.clone(),
            recorded_events,
            dropped_events,
            debug_mode: self.debug_mode(),
            queue: self.queue.status(),
            scheduler: self.scheduler.status(),
        }
    }

    /// Wait until at least `count` upload attempts have finished.
    pub async fn wait_for_attempts(&self, count: u64) {
        self.scheduler.wait_for_attempts(count).await;
    }

    /// Stop background uploads. Recorded events stay on disk for the next run.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeChoice {
    /// The caller's runtime when there is one
    Ambient,
    /// Always a dedicated runtime
    Owned,
}

/// Use the caller's runtime when allowed and present, otherwise start a
/// small dedicated runtime for uploads.
fn acquire_runtime(choice: RuntimeChoice) -> Result<(Handle, Option<Runtime>)> {
    if choice == RuntimeChoice::Ambient {
        if let Ok(handle) = Handle::try_current() {
            return Ok((handle, None));
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("telemetry-upload")
        .enable_all()
        .build()
        .map_err(|e| TelemetryError::Runtime(e.to_string()))?;
    let handle = runtime.handle().clone();
    Ok((handle, Some(runtime)))
}
