//! Monitor lifecycle: state machine, snapshot ownership, change emission and
//! bounded steady-state retry.
//!
//! A `Monitor` is a cheap handle (`Arc` inside). Data acquisition is delegated
//! to a [`MonitorDriver`]; the monitor owns everything else.
//!
//! Lifecycle transitions (start, stop, restart, the retry re-invocation of the
//! start hook, and the exhausted-retry teardown) are serialized by one
//! lifecycle lock. Snapshot replacement is serialized by the snapshot lock and
//! never waits on the lifecycle lock, so drivers may push updates while a
//! transition is in progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use scorewatch_core::{
    MonitorState, MonitorStatus, RetryDecision, RetryPolicy, RetryState, Snapshot, WatchDetails,
    detect_changes,
};
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::event::{MonitorEvent, MonitorUpdate};

/// Outcome of a successful start hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Resources are live; the monitor transitions to `Running`.
    Watching,
    /// Nothing to watch right now; the monitor goes back to `Stopped`.
    Idle,
}

/// Data-acquisition half of a monitor.
#[async_trait]
pub trait MonitorDriver: Send + Sync + 'static {
    /// Acquire resources and seed the snapshot. Also re-invoked by the retry
    /// path while the monitor is `Running`, so it must tolerate leftovers from
    /// a previous activation.
    async fn start_monitoring(&self, monitor: &Monitor) -> Result<Activation, MonitorError>;

    /// Release everything. Must not wait on tasks that may themselves be
    /// stopping the monitor.
    async fn stop_monitoring(&self, monitor: &Monitor) -> Result<(), MonitorError>;

    async fn watch_details(&self) -> Option<WatchDetails> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub retry: RetryPolicy,
    /// Per-monitor broadcast buffer; slow subscribers lag past this.
    pub event_capacity: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            event_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    name: String,
    driver: Arc<dyn MonitorDriver>,
    lifecycle: Mutex<()>,
    state: watch::Sender<MonitorState>,
    data: Mutex<SnapshotState>,
    retry: Mutex<RetryState>,
    /// Replaced on every start, cancelled on every stop.
    retry_cancel: Mutex<CancellationToken>,
    events: broadcast::Sender<MonitorEvent>,
}

struct SnapshotState {
    snapshot: Arc<Snapshot>,
    last_update: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(name: impl Into<String>, driver: impl MonitorDriver, options: MonitorOptions) -> Self {
        Self::with_driver(name, Arc::new(driver), options)
    }

    pub fn with_driver(
        name: impl Into<String>,
        driver: Arc<dyn MonitorDriver>,
        options: MonitorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (state, _) = watch::channel(MonitorState::Stopped);
        Self {
            inner: Arc::new(MonitorInner {
                name: name.into(),
                driver,
                lifecycle: Mutex::new(()),
                state,
                data: Mutex::new(SnapshotState {
                    snapshot: Arc::new(Snapshot::empty()),
                    last_update: None,
                }),
                retry: Mutex::new(RetryState::new(options.retry)),
                retry_cancel: Mutex::new(CancellationToken::new()),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Watch state transitions (tests and supervisors).
    pub fn state_changes(&self) -> watch::Receiver<MonitorState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.data.lock().await.snapshot)
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        self.inner.data.lock().await.last_update
    }

    pub async fn retry_count(&self) -> u32 {
        self.inner.retry.lock().await.retry_count()
    }

    // ─── Lifecycle ────────────────────────────────────────────────

    /// Start the monitor. A no-op when already starting or running.
    ///
    /// On a failed start hook the teardown hook runs best-effort, the monitor
    /// is left `Stopped`, and the error is returned.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Stop the monitor. A no-op when already stopped; teardown errors are
    /// logged, never returned.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stop then start, without another transition in between.
    pub async fn restart(&self) -> Result<(), MonitorError> {
        tracing::info!(monitor = %self.name(), "restarting monitor");
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), MonitorError> {
        let name = self.name();
        if self.state().is_active() {
            tracing::info!(monitor = %name, state = %self.state(), "monitor already running");
            return Ok(());
        }

        self.set_state(MonitorState::Starting);
        *self.inner.retry_cancel.lock().await = CancellationToken::new();
        tracing::info!(monitor = %name, "starting monitor");

        match self.inner.driver.start_monitoring(self).await {
            Ok(Activation::Watching) => {
                self.inner.retry.lock().await.reset();
                self.set_state(MonitorState::Running);
                tracing::info!(monitor = %name, "monitor started");
                self.emit(MonitorEvent::Started);
                Ok(())
            }
            Ok(Activation::Idle) => {
                self.set_state(MonitorState::Stopped);
                tracing::info!(monitor = %name, "nothing to watch, monitor idle");
                Ok(())
            }
            Err(e) => {
                tracing::error!(monitor = %name, "monitor failed to start: {e}");
                if let Err(cleanup) = self.inner.driver.stop_monitoring(self).await {
                    tracing::warn!(monitor = %name, "cleanup after failed start: {cleanup}");
                }
                self.set_state(MonitorState::Stopped);
                Err(e)
            }
        }
    }

    async fn stop_locked(&self) {
        let name = self.name();
        let state = self.state();
        if state == MonitorState::Stopped {
            tracing::debug!(monitor = %name, "monitor not running");
            return;
        }
        if state != MonitorState::Errored {
            self.set_state(MonitorState::Stopping);
        }
        tracing::info!(monitor = %name, "stopping monitor");

        self.inner.retry_cancel.lock().await.cancel();
        if let Err(e) = self.inner.driver.stop_monitoring(self).await {
            tracing::warn!(monitor = %name, "error during monitor teardown: {e}");
        }

        self.set_state(MonitorState::Stopped);
        tracing::info!(monitor = %name, "monitor stopped");
        self.emit(MonitorEvent::Stopped);
    }

    // ─── Snapshot Updates ─────────────────────────────────────────

    /// Diff `snapshot` against the current one and, when anything changed,
    /// replace it and emit an update. Returns whether the update was applied.
    ///
    /// Input arriving after stop is discarded.
    pub async fn handle_update(&self, snapshot: Snapshot) -> bool {
        if !self.state().is_active() {
            tracing::debug!(monitor = %self.name(), state = %self.state(), "discarding update");
            return false;
        }

        let mut data = self.inner.data.lock().await;
        let changes = detect_changes(&data.snapshot, &snapshot);
        if changes.is_empty() {
            return false;
        }

        let snapshot = Arc::new(snapshot);
        let timestamp = Utc::now();
        data.snapshot = Arc::clone(&snapshot);
        data.last_update = Some(timestamp);
        self.inner.retry.lock().await.reset();

        tracing::info!(
            monitor = %self.name(),
            changes = changes.len(),
            records = snapshot.len(),
            "changes detected"
        );
        // Emitted under the snapshot lock so event order matches replacement order.
        self.emit(MonitorEvent::Update(Arc::new(MonitorUpdate {
            snapshot,
            changes,
            timestamp,
        })));
        true
    }

    /// Replace the snapshot without diffing or emitting (initial population).
    pub async fn seed_snapshot(&self, snapshot: Snapshot) {
        let mut data = self.inner.data.lock().await;
        data.snapshot = Arc::new(snapshot);
        data.last_update = Some(Utc::now());
    }

    // ─── Errors & Retry ───────────────────────────────────────────

    /// Report a steady-state failure.
    ///
    /// Schedules a delayed re-run of the start hook while the retry budget
    /// lasts; once exhausted, marks the monitor `Errored`, emits an error event
    /// and stops it.
    pub fn handle_error(&self, error: MonitorError) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let name = self.name();
            if !self.state().is_active() {
                tracing::debug!(monitor = %name, "ignoring error from inactive monitor: {error}");
                return;
            }

            let (decision, max_retries) = {
                let mut retry = self.inner.retry.lock().await;
                (retry.record_failure(), retry.policy().max_retries)
            };
            match decision {
                RetryDecision::Retry { attempt, after } => {
                    tracing::warn!(
                        monitor = %name,
                        attempt,
                        max_retries,
                        delay_ms = after.as_millis() as u64,
                        "monitor error, retry scheduled: {error}"
                    );
                    self.schedule_retry(after).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    let _lifecycle = self.inner.lifecycle.lock().await;
                    if !self.state().is_active() {
                        return;
                    }
                    tracing::error!(
                        monitor = %name,
                        attempts,
                        "retries exhausted, stopping monitor: {error}"
                    );
                    self.set_state(MonitorState::Errored);
                    self.emit(MonitorEvent::Error(error));
                    self.stop_locked().await;
                }
            }
        })
    }

    async fn schedule_retry(&self, delay: Duration) {
        let cancel = self.inner.retry_cancel.lock().await.clone();
        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(monitor = %monitor.name(), "pending retry cancelled");
                }
                () = tokio::time::sleep(delay) => monitor.run_retry().await,
            }
        });
    }

    async fn run_retry(&self) {
        let name = self.name();
        let outcome = {
            let _lifecycle = self.inner.lifecycle.lock().await;
            if self.state() != MonitorState::Running {
                tracing::debug!(monitor = %name, state = %self.state(), "retry skipped");
                return;
            }
            tracing::info!(monitor = %name, "retrying start hook");
            self.inner.driver.start_monitoring(self).await
        };

        match outcome {
            // The budget is only cleared by an applied update; a reopen alone
            // does not prove the failure went away.
            Ok(Activation::Watching) => {
                tracing::info!(monitor = %name, "retry reopened sources");
            }
            Ok(Activation::Idle) => {
                tracing::info!(monitor = %name, "nothing to watch after retry");
                self.stop().await;
            }
            Err(e) => self.handle_error(e).await,
        }
    }

    // ─── Status ───────────────────────────────────────────────────

    pub async fn status(&self) -> MonitorStatus {
        let (record_count, last_update) = {
            let data = self.inner.data.lock().await;
            (data.snapshot.len(), data.last_update)
        };
        MonitorStatus {
            name: self.inner.name.clone(),
            state: self.state(),
            last_update,
            retry_count: self.retry_count().await,
            record_count,
            watch: self.inner.driver.watch_details().await,
        }
    }

    fn set_state(&self, state: MonitorState) {
        self.inner.state.send_replace(state);
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
