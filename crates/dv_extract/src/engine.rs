//! Extraction engine: one paced, resumable job per data type.
//!
//! ```text
//! idle ──extract──▶ extracting ──▶ complete | error
//!                    │      ▲
//!                 pause   resume
//!                    ▼      │
//!                    paused
//! ```
//! `stop` resets any state to idle. Pause and stop are observed at item
//! boundaries only; an in-flight fetch always runs to completion (or to its
//! timeout) first. Items are fetched strictly one at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dv_store::{Store, VaultSettings};

use crate::error::{ExtractError, SourceError};
use crate::listeners::{ListenerSet, Subscription};
use crate::source::{SourceDescriptor, SourceProvider};
use crate::state::{ExtractionState, ExtractionStatus, JobEvent, JobOutcome, Progress, StatusChange};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pause between items. Adjustable at runtime through `set_delay`.
    pub delay: Duration,
    pub fetch_timeout: Duration,
    /// Extra attempts per item before it counts as failed.
    pub retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(10),
            retry_attempts: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &VaultSettings) -> Self {
        Self {
            delay: settings.extraction_interval(),
            fetch_timeout: settings.fetch_timeout(),
            retry_attempts: settings.retry_attempts,
        }
    }
}

/// Cancellation handles for the current job. Replaced wholesale when a job
/// starts; the pause token alone is replaced on resume.
#[derive(Clone)]
struct JobControl {
    pause: CancellationToken,
    stop: CancellationToken,
}

impl JobControl {
    fn new() -> Self {
        Self {
            pause: CancellationToken::new(),
            stop: CancellationToken::new(),
        }
    }
}

pub struct ExtractionEngine {
    source: Arc<dyn SourceProvider>,
    store: Store,
    state: Mutex<ExtractionState>,
    delay_ms: AtomicU64,
    fetch_timeout: Duration,
    retry_attempts: u32,
    control: Mutex<JobControl>,
    /// Held for the whole fetch loop, so a restarted job waits for the
    /// previous loop to notice its stop.
    run_lock: tokio::sync::Mutex<()>,
    status_listeners: Arc<ListenerSet<StatusChange>>,
    progress_listeners: Arc<ListenerSet<Progress>>,
    events: broadcast::Sender<JobEvent>,
}

impl ExtractionEngine {
    pub fn new(source: Arc<dyn SourceProvider>, store: Store, config: EngineConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            source,
            store,
            state: Mutex::new(ExtractionState::idle(config.delay)),
            delay_ms: AtomicU64::new(duration_ms(config.delay)),
            fetch_timeout: config.fetch_timeout,
            retry_attempts: config.retry_attempts,
            control: Mutex::new(JobControl::new()),
            run_lock: tokio::sync::Mutex::new(()),
            status_listeners: ListenerSet::new(),
            progress_listeners: ListenerSet::new(),
            events,
        })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        self.source.descriptor()
    }

    pub fn get_status(&self) -> ExtractionState {
        self.state.lock().clone()
    }

    /// Takes effect from the next pause between items.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(duration_ms(delay), Ordering::SeqCst);
        self.state.lock().delay = delay;
        debug!(record_type = %self.descriptor().record_type, delay_ms = duration_ms(delay), "delay updated");
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    pub fn on_status_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.status_listeners.add(callback)
    }

    pub fn on_progress_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress_listeners.add(move |p: &Progress| callback(*p))
    }

    /// Ordered stream of every status and progress event.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Start a job from item 0 and run it until it completes, pauses, stops
    /// or fails.
    pub async fn extract(&self) -> Result<JobOutcome, ExtractError> {
        let descriptor = self.descriptor().clone();
        let (stop, snapshot) = {
            let mut state = self.state.lock();
            if !state.status.can_start() {
                return Err(ExtractError::AlreadyRunning(descriptor.label));
            }
            let control = JobControl::new();
            let stop = control.stop.clone();
            *self.control.lock() = control;

            *state = ExtractionState::idle(self.delay());
            state.status = ExtractionStatus::Extracting;
            state.message = format!(
                "Extracting {} data from {}...",
                descriptor.record_type, descriptor.source
            );
            (stop, state.clone())
        };
        info!(record_type = %descriptor.record_type, source = %descriptor.source, "extraction started");
        self.emit_status(&snapshot);

        let _running = self.run_lock.lock().await;
        if stop.is_cancelled() {
            return Ok(JobOutcome::Stopped);
        }

        let total = match self.source.len().await {
            Ok(total) => total,
            Err(e) => return Err(self.abort(&stop, e)),
        };
        let Some(snapshot) = self.update_live(&stop, |s| s.progress = Progress { current: 0, total }) else {
            return Ok(JobOutcome::Stopped);
        };
        self.emit_progress(snapshot.progress);

        self.run_loop(&stop).await
    }

    /// Request a pause. The loop parks at the next item boundary.
    pub fn pause(&self) -> Result<(), ExtractError> {
        let state = self.state.lock();
        if state.status != ExtractionStatus::Extracting {
            return Err(ExtractError::InvalidTransition {
                action: "pause",
                status: state.status,
            });
        }
        self.control.lock().pause.cancel();
        info!(record_type = %self.descriptor().record_type, cursor = state.cursor, "pause requested");
        Ok(())
    }

    /// Continue a paused job from its saved cursor.
    ///
    /// If the pause was requested but the loop has not reached a boundary
    /// yet, the request is withdrawn and the running loop carries on.
    pub async fn resume(&self) -> Result<JobOutcome, ExtractError> {
        let (stop, snapshot) = {
            let mut state = self.state.lock();
            let mut control = self.control.lock();
            match state.status {
                ExtractionStatus::Paused => {
                    control.pause = CancellationToken::new();
                    state.status = ExtractionStatus::Extracting;
                    state.message = format!(
                        "Resuming {} extraction at item {} of {}...",
                        self.descriptor().record_type,
                        state.cursor + 1,
                        state.progress.total
                    );
                    (control.stop.clone(), state.clone())
                }
                ExtractionStatus::Extracting if control.pause.is_cancelled() => {
                    control.pause = CancellationToken::new();
                    debug!(record_type = %self.descriptor().record_type, "pending pause withdrawn");
                    return Ok(JobOutcome::Continuing);
                }
                status => {
                    return Err(ExtractError::InvalidTransition {
                        action: "resume",
                        status,
                    })
                }
            }
        };
        info!(record_type = %self.descriptor().record_type, cursor = snapshot.cursor, "extraction resumed");
        self.emit_status(&snapshot);

        let _running = self.run_lock.lock().await;
        self.run_loop(&stop).await
    }

    /// Abandon the current job and reset to idle. Not resumable.
    pub fn stop(&self) {
        self.control.lock().stop.cancel();
        let snapshot = {
            let mut state = self.state.lock();
            *state = ExtractionState::idle(self.delay());
            state.clone()
        };
        info!(record_type = %self.descriptor().record_type, "extraction stopped");
        self.emit_status(&snapshot);
        self.emit_progress(snapshot.progress);
    }

    async fn run_loop(&self, stop: &CancellationToken) -> Result<JobOutcome, ExtractError> {
        let record_type = self.descriptor().record_type.clone();

        loop {
            if stop.is_cancelled() {
                debug!(record_type = %record_type, "stop observed");
                return Ok(JobOutcome::Stopped);
            }
            let (cursor, total) = {
                let s = self.state.lock();
                (s.cursor, s.progress.total)
            };
            if cursor >= total {
                break;
            }
            if self.control.lock().pause.is_cancelled() {
                let mut parked = false;
                // Re-read under the state lock: a resume() that withdrew the
                // pause since the check above must win.
                let Some(snapshot) = self.update_live(stop, |s| {
                    if self.control.lock().pause.is_cancelled() {
                        parked = true;
                        s.status = ExtractionStatus::Paused;
                        s.message = format!("Extraction paused at item {} of {}", cursor + 1, total);
                    }
                }) else {
                    return Ok(JobOutcome::Stopped);
                };
                if parked {
                    info!(record_type = %record_type, cursor, total, "extraction paused");
                    self.emit_status(&snapshot);
                    return Ok(JobOutcome::Paused { cursor });
                }
                debug!(record_type = %record_type, cursor, "pause withdrawn before boundary");
            }

            let stored = match self.fetch_item(cursor, stop).await {
                Ok(item) => self.store_item(cursor, item, stop).await,
                Err(e) if e.is_fatal() => return Err(self.abort(stop, e)),
                Err(e) => {
                    let err = ExtractError::ItemFetch { index: cursor, source: e };
                    warn!(record_type = %record_type, error = %err, "item skipped");
                    false
                }
            };

            let Some(snapshot) = self.update_live(stop, |s| {
                s.cursor = cursor + 1;
                s.progress.current = s.cursor;
                if stored {
                    s.stored += 1;
                } else {
                    s.failed += 1;
                }
            }) else {
                return Ok(JobOutcome::Stopped);
            };
            self.emit_progress(snapshot.progress);

            if snapshot.cursor < snapshot.progress.total {
                self.pace(stop).await;
            }
        }

        let label = self.descriptor().label.clone();
        let Some(snapshot) = self.update_live(stop, |s| {
            s.status = ExtractionStatus::Complete;
            s.message = if s.failed == 0 {
                format!("Successfully extracted {} {label}.", s.stored)
            } else {
                format!("Successfully extracted {} {label} ({} failed).", s.stored, s.failed)
            };
        }) else {
            return Ok(JobOutcome::Stopped);
        };
        info!(record_type = %record_type, stored = snapshot.stored, failed = snapshot.failed, "extraction complete");
        self.emit_status(&snapshot);
        Ok(JobOutcome::Completed {
            stored: snapshot.stored,
            failed: snapshot.failed,
        })
    }

    async fn fetch_item(&self, index: usize, stop: &CancellationToken) -> Result<Value, SourceError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.fetch_timeout, self.source.fetch(index)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.fetch_timeout)),
            };
            match result {
                Err(e) if !e.is_fatal() && attempt < self.retry_attempts && !stop.is_cancelled() => {
                    attempt += 1;
                    debug!(index, attempt, error = %e, "retrying item");
                    self.pace(stop).await;
                }
                other => return other,
            }
        }
    }

    /// Returns whether the item landed in the store.
    async fn store_item(&self, index: usize, item: Value, stop: &CancellationToken) -> bool {
        // A stop that arrived during the fetch discards the item.
        if stop.is_cancelled() {
            return false;
        }
        let record = match self.descriptor().to_record(item) {
            Ok(record) => record,
            Err(e) => {
                let err = ExtractError::ItemFetch { index, source: e };
                warn!(error = %err, "item skipped");
                return false;
            }
        };
        match self.store.put(&record).await {
            Ok(()) => {
                debug!(index, id = %record.id, "item stored");
                true
            }
            Err(e) => {
                let err = ExtractError::from(e);
                warn!(index, id = %record.id, error = %err, "failed to store item");
                false
            }
        }
    }

    /// Sleep the current delay. A stop cuts the sleep short; a pause does not.
    async fn pace(&self, stop: &CancellationToken) {
        let delay = self.delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.cancelled() => {}
        }
    }

    fn abort(&self, stop: &CancellationToken, cause: SourceError) -> ExtractError {
        let reason = cause.to_string();
        let record_type = &self.descriptor().record_type;
        error!(record_type = %record_type, error = %reason, "extraction aborted");
        if let Some(snapshot) = self.update_live(stop, |s| {
            s.status = ExtractionStatus::Error;
            s.message = format!("Failed to extract {record_type} data: {reason}");
        }) {
            self.emit_status(&snapshot);
        }
        ExtractError::JobFatal(reason)
    }

    /// Apply `f` to the state unless the job has been stopped, returning the
    /// updated snapshot. The stop check and the write share one lock so a
    /// concurrent `stop` reset is never overwritten.
    fn update_live(
        &self,
        stop: &CancellationToken,
        f: impl FnOnce(&mut ExtractionState),
    ) -> Option<ExtractionState> {
        let mut state = self.state.lock();
        if stop.is_cancelled() {
            return None;
        }
        f(&mut state);
        Some(state.clone())
    }

    fn emit_status(&self, state: &ExtractionState) {
        let change = state.status_change();
        self.status_listeners.emit(&change);
        let _ = self.events.send(JobEvent::Status(change));
    }

    fn emit_progress(&self, progress: Progress) {
        self.progress_listeners.emit(&progress);
        let _ = self.events.send(JobEvent::Progress(progress));
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
