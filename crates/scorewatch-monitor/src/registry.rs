//! Named collection of monitors with fan-out lifecycle and event relay.
//!
//! Every registered monitor gets a relay task that re-publishes its events on
//! the registry channel tagged with the monitor's name.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use scorewatch_core::RegistryStatus;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::error::RegistryError;
use crate::event::RegistryEvent;
use crate::monitor::Monitor;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownSignal};

const EVENT_CAPACITY: usize = 1024;

/// Result of a fan-out operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSummary {
    pub total: usize,
    pub running: usize,
}

struct RegistryEntry {
    monitor: Monitor,
    relay: JoinHandle<()>,
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

pub struct MonitorRegistry {
    entries: Mutex<BTreeMap<String, RegistryEntry>>,
    events: broadcast::Sender<RegistryEvent>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl MonitorRegistry {
    pub fn new(shutdown: Arc<ShutdownCoordinator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            events,
            shutdown,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    // ─── Membership ───────────────────────────────────────────────

    pub async fn add(&self, monitor: Monitor) -> Result<(), RegistryError> {
        let name = monitor.name().to_string();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        let relay = spawn_relay(&monitor, self.events.clone());
        entries.insert(name.clone(), RegistryEntry { monitor, relay });
        drop(entries);

        tracing::info!(monitor = %name, "monitor added");
        self.emit(RegistryEvent::MonitorAdded { name });
        Ok(())
    }

    /// Unregister without stopping; the relay task is dropped with the entry.
    /// Returns whether anything was removed.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.entries.lock().await.remove(name);
        match removed {
            Some(entry) => {
                drop(entry);
                tracing::info!(monitor = %name, "monitor removed");
                self.emit(RegistryEvent::MonitorRemoved {
                    name: name.to_string(),
                });
                true
            }
            None => {
                tracing::warn!(monitor = %name, "monitor not found");
                false
            }
        }
    }

    pub async fn monitor(&self, name: &str) -> Option<Monitor> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|entry| entry.monitor.clone())
    }

    pub async fn monitors(&self) -> Vec<Monitor> {
        self.entries
            .lock()
            .await
            .values()
            .map(|entry| entry.monitor.clone())
            .collect()
    }

    pub async fn running_monitors(&self) -> Vec<Monitor> {
        let mut monitors = self.monitors().await;
        monitors.retain(Monitor::is_running);
        monitors
    }

    pub async fn stopped_monitors(&self) -> Vec<Monitor> {
        let mut monitors = self.monitors().await;
        monitors.retain(|m| !m.is_running());
        monitors
    }

    // ─── Single-monitor Lifecycle ─────────────────────────────────

    pub async fn start_monitor(&self, name: &str) -> Result<(), RegistryError> {
        if self.shutdown.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }
        let monitor = self.require(name).await?;
        monitor
            .start()
            .await
            .map_err(|source| RegistryError::Monitor {
                name: name.to_string(),
                source,
            })
    }

    pub async fn stop_monitor(&self, name: &str) -> Result<(), RegistryError> {
        self.require(name).await?.stop().await;
        Ok(())
    }

    pub async fn restart_monitor(&self, name: &str) -> Result<(), RegistryError> {
        if self.shutdown.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }
        let monitor = self.require(name).await?;
        monitor
            .restart()
            .await
            .map_err(|source| RegistryError::Monitor {
                name: name.to_string(),
                source,
            })
    }

    async fn require(&self, name: &str) -> Result<Monitor, RegistryError> {
        self.monitor(name)
            .await
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    // ─── Fan-out ──────────────────────────────────────────────────

    /// Start every monitor concurrently. Individual failures are logged and
    /// do not affect the others.
    pub async fn start_all(&self) -> Result<FanOutSummary, RegistryError> {
        if self.shutdown.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }
        let monitors = self.monitors().await;
        tracing::info!(count = monitors.len(), "starting monitors");

        join_all(monitors.iter().map(|monitor| async move {
            if let Err(e) = monitor.start().await {
                tracing::error!(monitor = %monitor.name(), "failed to start monitor: {e}");
            }
        }))
        .await;

        let summary = summarize(&monitors);
        tracing::info!(
            running = summary.running,
            total = summary.total,
            "monitors started"
        );
        self.emit(RegistryEvent::AllStarted {
            total: summary.total,
            running: summary.running,
        });
        Ok(summary)
    }

    pub async fn stop_all(&self) -> FanOutSummary {
        let monitors = self.monitors().await;
        tracing::info!(count = monitors.len(), "stopping monitors");
        join_all(monitors.iter().map(Monitor::stop)).await;

        let summary = summarize(&monitors);
        tracing::info!("all monitors stopped");
        self.emit(RegistryEvent::AllStopped {
            total: summary.total,
            running: summary.running,
        });
        summary
    }

    /// Restart every monitor concurrently; each monitor stops before it starts.
    pub async fn restart_all(&self) -> Result<FanOutSummary, RegistryError> {
        if self.shutdown.is_shutting_down() {
            return Err(RegistryError::ShuttingDown);
        }
        let monitors = self.monitors().await;
        tracing::info!(count = monitors.len(), "restarting monitors");

        join_all(monitors.iter().map(|monitor| async move {
            if let Err(e) = monitor.restart().await {
                tracing::error!(monitor = %monitor.name(), "failed to restart monitor: {e}");
            }
        }))
        .await;

        let summary = summarize(&monitors);
        tracing::info!(
            running = summary.running,
            total = summary.total,
            "monitors restarted"
        );
        self.emit(RegistryEvent::AllRestarted {
            total: summary.total,
            running: summary.running,
        });
        Ok(summary)
    }

    // ─── Status & Shutdown ────────────────────────────────────────

    pub async fn status(&self) -> RegistryStatus {
        let monitors = self.monitors().await;
        let statuses = join_all(monitors.iter().map(Monitor::status)).await;
        RegistryStatus::from_monitors(statuses, self.shutdown.is_shutting_down())
    }

    /// Graceful shutdown on the first signal, forced on any later one. The
    /// caller maps the outcome to a process exit.
    pub async fn handle_signal(&self, signal: ShutdownSignal) -> ShutdownOutcome {
        let shutdown = Arc::clone(&self.shutdown);
        shutdown.handle_signal(signal, self).await
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }
}

fn summarize(monitors: &[Monitor]) -> FanOutSummary {
    FanOutSummary {
        total: monitors.len(),
        running: monitors.iter().filter(|m| m.is_running()).count(),
    }
}

/// Subscribes before spawning so no event emitted after `add` returns is missed.
fn spawn_relay(monitor: &Monitor, events: broadcast::Sender<RegistryEvent>) -> JoinHandle<()> {
    let name = monitor.name().to_string();
    let mut rx = monitor.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let _ = events.send(RegistryEvent::from_monitor(&name, event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(monitor = %name, skipped, "event relay lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scorewatch_core::{MonitorState, Record, Snapshot};
    use serde_json::json;

    use crate::error::{MonitorError, ProviderError};
    use crate::monitor::{Activation, MonitorDriver, MonitorOptions};

    struct FlagDriver {
        fail_start: AtomicBool,
    }

    #[async_trait]
    impl MonitorDriver for FlagDriver {
        async fn start_monitoring(&self, _monitor: &Monitor) -> Result<Activation, MonitorError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(MonitorError::Provider(ProviderError::Schedule(
                    "schedule unavailable".into(),
                )));
            }
            Ok(Activation::Watching)
        }

        async fn stop_monitoring(&self, _monitor: &Monitor) -> Result<(), MonitorError> {
            Ok(())
        }
    }

    fn monitor(name: &str, fail_start: bool) -> Monitor {
        Monitor::new(
            name,
            FlagDriver {
                fail_start: AtomicBool::new(fail_start),
            },
            MonitorOptions::default(),
        )
    }

    fn registry() -> MonitorRegistry {
        MonitorRegistry::new(Arc::new(ShutdownCoordinator::new(Duration::from_secs(5))))
    }

    #[tokio::test]
    async fn add_rejects_duplicate_names() {
        let registry = registry();
        registry.add(monitor("scores", false)).await.expect("first add");
        let err = registry
            .add(monitor("scores", false))
            .await
            .expect_err("duplicate add");
        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "scores"));
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let registry = registry();
        registry.add(monitor("scores", false)).await.expect("add");
        assert!(registry.remove("scores").await);
        assert!(!registry.remove("scores").await);
        assert!(registry.monitor("scores").await.is_none());
    }

    #[tokio::test]
    async fn start_all_isolates_failures() {
        let registry = registry();
        registry.add(monitor("a", false)).await.expect("add a");
        registry.add(monitor("b", true)).await.expect("add b");
        registry.add(monitor("c", false)).await.expect("add c");

        let summary = registry.start_all().await.expect("start_all");
        assert_eq!(summary, FanOutSummary { total: 3, running: 2 });

        let running: Vec<String> = registry
            .running_monitors()
            .await
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(running, vec!["a", "c"]);
        assert_eq!(registry.stopped_monitors().await.len(), 1);

        let status = registry.status().await;
        assert_eq!((status.total, status.running, status.stopped), (3, 2, 1));
        assert!(!status.is_shutting_down);
    }

    #[tokio::test]
    async fn relays_monitor_events_with_name() {
        let registry = registry();
        let mut events = registry.subscribe();
        let scores = monitor("scores", false);
        registry.add(scores.clone()).await.expect("add");
        assert!(matches!(
            events.recv().await,
            Ok(RegistryEvent::MonitorAdded { name }) if name == "scores"
        ));

        registry.start_monitor("scores").await.expect("start");
        assert!(matches!(
            events.recv().await,
            Ok(RegistryEvent::MonitorStarted { name }) if name == "scores"
        ));

        scores
            .handle_update(Snapshot::new(vec![Record::new("1", json!({"status": "live"}))]))
            .await;
        match events.recv().await {
            Ok(RegistryEvent::MonitorUpdate { name, update }) => {
                assert_eq!(name, "scores");
                assert_eq!(update.changes.len(), 1);
            }
            other => panic!("expected relayed update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn removed_monitor_is_no_longer_relayed() {
        let registry = registry();
        let scores = monitor("scores", false);
        registry.add(scores.clone()).await.expect("add");
        registry.remove("scores").await;
        let mut events = registry.subscribe();

        scores.start().await.expect("start");
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_monitor_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.start_monitor("missing").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.stop_monitor("missing").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn restart_all_brings_monitors_back() {
        let registry = registry();
        registry.add(monitor("a", false)).await.expect("add");
        registry.start_all().await.expect("start_all");
        let summary = registry.restart_all().await.expect("restart_all");
        assert_eq!(summary.running, 1);

        let stopped = registry.stop_all().await;
        assert_eq!(stopped, FanOutSummary { total: 1, running: 0 });
        let a = registry.monitor("a").await.expect("registered");
        assert_eq!(a.state(), MonitorState::Stopped);
    }
}
