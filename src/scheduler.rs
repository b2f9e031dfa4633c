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

// Upload scheduling: one attempt in flight, coalesced triggers, exponential backoff

use crate::config::{BackoffConfig, UploadConfig};
use crate::uploader::{BatchUploader, UploadOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Uploading,
    BackoffWait,
}

/// Why an upload attempt was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Timer,
    Startup,
    AppPaused,
    AppResumed,
    NetworkReconnected,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Attempts started
    pub attempts: u64,
    /// Attempts finished, successfully or not
    pub completed_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub uploaded_events: u64,
    /// Triggers that arrived while an attempt was in flight
    pub coalesced_triggers: u64,
    pub last_trigger: Option<Trigger>,
    pub last_error: Option<String>,
    /// Current backoff wait, set while in `BackoffWait`
    pub backoff_ms: Option<u64>,
}

/// Deterministic exponential backoff: `base`, `2*base`, `4*base`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: None,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base(), config.max())
    }

    /// Delay to wait after the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.base,
            Some(previous) => previous.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    /// Forget accumulated failures after a success.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

/// Drives the batch uploader from triggers and a periodic timer.
///
/// At most one attempt is in flight. Any number of triggers that arrive
/// during an attempt result in at most one follow-up attempt.
pub struct UploadScheduler {
    notify: Arc<Notify>,
    status: Arc<watch::Sender<SchedulerStatus>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UploadScheduler {
    /// Spawn the scheduler worker on `runtime`.
    pub fn start(
        uploader: Arc<BatchUploader>,
        upload: &UploadConfig,
        backoff: &BackoffConfig,
        debug_mode: Arc<AtomicBool>,
        runtime: &Handle,
    ) -> Self {
        let notify = Arc::new(Notify::new());
        let (status_tx, _) = watch::channel(SchedulerStatus::default());
        let status = Arc::new(status_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = UploadWorker {
            uploader,
            notify: notify.clone(),
            status: status.clone(),
            shutdown: shutdown_rx,
            interval: upload.interval(),
            backoff: Backoff::from_config(backoff),
            debug_mode,
        };

        info!(
            "Starting upload scheduler (interval {:?}, backoff {:?}..{:?})",
            upload.interval(),
            backoff.base(),
            backoff.max()
        );
        let handle = runtime.spawn(worker.run());

        Self {
            notify,
            status,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Request an upload attempt. Never blocks.
    pub fn trigger(&self, trigger: Trigger) {
        self.status.send_modify(|status| {
            status.last_trigger = Some(trigger);
            if status.state == SchedulerState::Uploading {
                status.coalesced_triggers += 1;
            }
        });
        self.notify.notify_one();
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Wait until at least `count` attempts have finished.
    pub async fn wait_for_attempts(&self, count: u64) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|status| status.completed_attempts >= count).await;
    }

    /// Stop the worker. An in-flight attempt is abandoned without touching
    /// the checkpoint.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send_replace(true);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if worker.is_some() {
            info!("Upload scheduler shutting down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct UploadWorker {
    uploader: Arc<BatchUploader>,
    notify: Arc<Notify>,
    status: Arc<watch::Sender<SchedulerStatus>>,
    shutdown: watch::Receiver<bool>,
    interval: Duration,
    backoff: Backoff,
    debug_mode: Arc<AtomicBool>,
}

impl UploadWorker {
    async fn run(mut self) {
        if let Err(e) = self.uploader.transport().initialize().await {
            warn!("Transport initialization failed: {}", e);
        }

        // A zero period would panic in `interval_at`
        let period = self.interval.max(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.set_state(SchedulerState::Idle, None);

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = ticker.tick() => {
                    self.status.send_modify(|status| status.last_trigger = Some(Trigger::Timer));
                }
                _ = self.shutdown.changed() => break,
            }

            if !self.drain().await {
                break;
            }
        }

        self.set_state(SchedulerState::Idle, None);
        info!("Upload scheduler stopped");
    }

    /// Run attempts until one succeeds without a size-limited batch.
    /// Returns false when shutdown was requested.
    async fn drain(&mut self) -> bool {
        let uploader = self.uploader.clone();

        loop {
            let attempt = self.begin_attempt();

            let result = tokio::select! {
                result = uploader.upload_once() => result,
                _ = self.shutdown.changed() => {
                    info!("Abandoning in-flight upload attempt {}", attempt);
                    return false;
                }
            };

            match result {
                Ok(outcome) => {
                    self.backoff.reset();
                    let more_pending =
                        matches!(&outcome, UploadOutcome::Uploaded(report) if report.more_pending);
                    self.finish_success(&outcome);
                    if !more_pending {
                        return true;
                    }
                    // The continuation already covers triggers from this attempt
                    self.discard_pending_trigger().await;
                    if self.debug_mode.load(Ordering::Relaxed) {
                        debug!("Batch limit reached, continuing with next batch");
                    }
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    if e.is_retryable() {
                        warn!(
                            "Upload attempt {} failed: {}. Retrying in {:?}",
                            attempt, e, delay
                        );
                    } else {
                        error!(
                            "Upload attempt {} failed: {}. Retrying in {:?}",
                            attempt, e, delay
                        );
                    }
                    // Triggers from the failed attempt wait out the backoff too
                    self.discard_pending_trigger().await;
                    self.finish_failure(e.to_string(), delay);

                    if !self.wait_out_backoff(delay).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep through the backoff. When it expires on its own, check the
    /// transport and keep backing off while the collector is unreachable.
    /// A trigger ends the wait without a check. Returns false on shutdown.
    async fn wait_out_backoff(&mut self, mut delay: Duration) -> bool {
        let transport = self.uploader.transport().clone();

        loop {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.notify.notified() => {
                    debug!("Backoff wait interrupted by trigger");
                    return true;
                }
                _ = self.shutdown.changed() => return false,
            }

            let healthy = tokio::select! {
                healthy = transport.health_check() => healthy,
                _ = self.shutdown.changed() => return false,
            };
            match healthy {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!("Transport health check failed: {}", e),
            }

            delay = self.backoff.next_delay();
            warn!(
                "{} collector unreachable, next check in {:?}",
                transport.transport_type(),
                delay
            );
            let backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.set_state(SchedulerState::BackoffWait, Some(backoff_ms));
        }
    }

    async fn discard_pending_trigger(&self) {
        tokio::select! {
            biased;
            _ = self.notify.notified() => {}
            _ = std::future::ready(()) => {}
        }
    }

    fn begin_attempt(&self) -> u64 {
        let mut attempt = 0;
        self.status.send_modify(|status| {
            status.state = SchedulerState::Uploading;
            status.backoff_ms = None;
            status.attempts += 1;
            attempt = status.attempts;
        });
        if self.debug_mode.load(Ordering::Relaxed) {
            debug!("Starting upload attempt {}", attempt);
        }
        attempt
    }

    fn finish_success(&self, outcome: &UploadOutcome) {
        let events = match outcome {
            UploadOutcome::Uploaded(report) => report.events as u64,
            UploadOutcome::Empty => 0,
        };
        self.status.send_modify(|status| {
            status.completed_attempts += 1;
            status.successes += 1;
            status.uploaded_events += events;
            status.last_error = None;
        });
    }

    fn finish_failure(&self, error: String, delay: Duration) {
        let backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.status.send_modify(|status| {
            status.state = SchedulerState::BackoffWait;
            status.completed_attempts += 1;
            status.failures += 1;
            status.last_error = Some(error);
            status.backoff_ms = Some(backoff_ms);
        });
    }

    fn set_state(&self, state: SchedulerState, backoff_ms: Option<u64>) {
        self.status.send_if_modified(|status| {
            if status.state == state && status.backoff_ms == backoff_ms {
                return false;
            }
            status.state = state;
            status.backoff_ms = backoff_ms;
            true
        });
    }
}
