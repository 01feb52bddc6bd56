use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("record is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("record has no usable id: {0}")]
    MissingId(String),
}

// ─── Records & Snapshots ──────────────────────────────────────────

/// One logical item (a match) with a stable identity key and an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub data: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Build a record from a JSON object carrying an `id` field.
    ///
    /// String and integer ids are accepted; the payload keeps the whole object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(ref map) = value else {
            return Err(CoreError::NotAnObject(value.to_string()));
        };
        let id = match map.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(CoreError::MissingId(value.to_string())),
        };
        Ok(Self { id, data: value })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

/// Full set of records held by a monitor. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    records: Vec<Record>,
}

impl Snapshot {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Last record carrying `id`, matching the diff's map semantics.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().rev().find(|r| r.id == id)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Snapshot {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<Record> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ─── Change Records ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delta between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeRecord {
    Added {
        id: String,
        data: Value,
    },
    Updated {
        id: String,
        old_data: Value,
        new_data: Value,
    },
    Removed {
        id: String,
        data: Value,
    },
}

impl ChangeRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::Added { id, .. } | Self::Updated { id, .. } | Self::Removed { id, .. } => id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Added { .. } => ChangeKind::Added,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Removed { .. } => ChangeKind::Removed,
        }
    }
}

// ─── Sources ──────────────────────────────────────────────────────

/// Where and how to watch one source (one competition feed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    /// Connection target for the resource provider (URL, file path, ...).
    pub target: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Static attributes stamped onto every record extracted from this source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn default_active() -> bool {
    true
}

impl SourceConfig {
    pub fn new(key: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
            active: true,
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Active and pointing somewhere.
    pub fn is_watchable(&self) -> bool {
        self.active && !self.target.trim().is_empty()
    }
}

// ─── Monitor Lifecycle ────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Retries exhausted; cleanup in progress, always followed by `Stopped`.
    Errored,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Errored => "errored",
        }
    }

    /// Starting or Running: a start request is a no-op in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Status Reports ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub name: String,
    pub state: MonitorState,
    pub last_update: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub record_count: usize,
    /// Driver-specific details (resources, digests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchDetails>,
}

impl MonitorStatus {
    pub fn is_running(&self) -> bool {
        self.state == MonitorState::Running
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDetails {
    pub watched_resources: usize,
    /// Keys last reported active by the schedule.
    pub configured_sources: usize,
    pub resources: BTreeMap<String, ResourceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub is_open: bool,
    pub target: String,
    pub last_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub is_shutting_down: bool,
    pub monitors: Vec<MonitorStatus>,
}

impl RegistryStatus {
    pub fn from_monitors(monitors: Vec<MonitorStatus>, is_shutting_down: bool) -> Self {
        let total = monitors.len();
        let running = monitors.iter().filter(|m| m.is_running()).count();
        Self {
            total,
            running,
            stopped: total - running,
            is_shutting_down,
            monitors,
        }
    }
}
