//! Typed notifications emitted by monitors and relayed by the registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use scorewatch_core::{ChangeRecord, Snapshot};

use crate::error::MonitorError;

/// Payload of an applied snapshot replacement.
#[derive(Debug, Clone)]
pub struct MonitorUpdate {
    pub snapshot: Arc<Snapshot>,
    pub changes: Vec<ChangeRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Started,
    Stopped,
    Update(Arc<MonitorUpdate>),
    /// Retries exhausted; the monitor is stopping and needs operator attention.
    Error(MonitorError),
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    MonitorAdded { name: String },
    MonitorRemoved { name: String },
    MonitorStarted { name: String },
    MonitorStopped { name: String },
    MonitorUpdate { name: String, update: Arc<MonitorUpdate> },
    MonitorError { name: String, error: MonitorError },
    AllStarted { total: usize, running: usize },
    AllStopped { total: usize, running: usize },
    AllRestarted { total: usize, running: usize },
}

impl RegistryEvent {
    /// Relay a per-monitor event under the monitor's name.
    pub fn from_monitor(name: &str, event: MonitorEvent) -> Self {
        let name = name.to_string();
        match event {
            MonitorEvent::Started => Self::MonitorStarted { name },
            MonitorEvent::Stopped => Self::MonitorStopped { name },
            MonitorEvent::Update(update) => Self::MonitorUpdate { name, update },
            MonitorEvent::Error(error) => Self::MonitorError { name, error },
        }
    }
}
