//! File-backed collaborators: the config file is the schedule and the source
//! catalogue, and each source is a JSON feed file watched with `notify`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use scorewatch_core::{Record, SourceConfig};
use scorewatch_monitor::{
    ProviderError, ResourceProvider, ResourceSignal, Schedule, SignalSender, SourceResolver,
};
use serde_json::Value;

use crate::config::{AppConfig, resolve_target};

// ─── Schedule & Resolver ──────────────────────────────────────────

/// Active sources are the ones flagged `active` in the config file. The file
/// is re-read on every query so edits apply at the next reconciliation.
pub struct ConfigSchedule {
    path: PathBuf,
}

impl ConfigSchedule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Schedule for ConfigSchedule {
    async fn active_source_keys(&self) -> Result<BTreeSet<String>, ProviderError> {
        let config =
            AppConfig::load(&self.path).map_err(|e| ProviderError::Schedule(e.to_string()))?;
        Ok(config.active_keys())
    }
}

pub struct ConfigResolver {
    path: PathBuf,
}

impl ConfigResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceResolver for ConfigResolver {
    async fn resolve(&self, key: &str) -> Result<Option<SourceConfig>, ProviderError> {
        let config = AppConfig::load(&self.path).map_err(|e| ProviderError::Resolve {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        Ok(config.source(key).map(|source| {
            let mut source = source.clone();
            if !source.target.trim().is_empty() {
                source.target = resolve_target(&self.path, &source.target)
                    .display()
                    .to_string();
            }
            source
        }))
    }
}

// ─── Feed Files ───────────────────────────────────────────────────

/// One watched feed file.
pub struct FeedFile {
    key: String,
    path: PathBuf,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FeedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
pub struct FileFeedProvider;

impl FileFeedProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResourceProvider for FileFeedProvider {
    type Resource = FeedFile;

    async fn acquire(&self, config: &SourceConfig) -> Result<FeedFile, ProviderError> {
        let path = PathBuf::from(&config.target);
        if !path.is_file() {
            return Err(ProviderError::Acquisition {
                key: config.key.clone(),
                detail: format!("feed file {} not found", path.display()),
            });
        }
        Ok(FeedFile {
            key: config.key.clone(),
            path,
            watcher: Mutex::new(None),
        })
    }

    async fn release(&self, resource: &FeedFile) -> Result<(), ProviderError> {
        // Dropping the watcher unregisters it.
        let watcher = resource
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(watcher);
        tracing::debug!(source = %resource.key, path = %resource.path.display(), "feed released");
        Ok(())
    }

    async fn fetch_content(&self, resource: &FeedFile) -> Result<String, ProviderError> {
        std::fs::read_to_string(&resource.path).map_err(|e| ProviderError::Fetch {
            target: resource.path.display().to_string(),
            detail: e.to_string(),
        })
    }

    fn attach_listeners(
        &self,
        resource: &FeedFile,
        signals: SignalSender,
    ) -> Result<(), ProviderError> {
        let attach_error = |detail: String| ProviderError::Attach {
            target: resource.path.display().to_string(),
            detail,
        };
        // Watch the parent so atomic replacements (write + rename) are seen.
        let dir = resource
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let target = resource.path.clone();
        let key = resource.key.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !event.paths.iter().any(|p| same_file_name(p, &target)) {
                    return;
                }
                if let Some(signal) = classify(&event.kind) {
                    // Receiver gone means the source was released.
                    let _ = signals.send(signal);
                }
            }
            Err(e) => tracing::warn!(source = %key, "feed watcher error: {e}"),
        })
        .map_err(|e| attach_error(e.to_string()))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| attach_error(e.to_string()))?;

        *resource
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    fn compute_digest(&self, content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex().to_string()
    }

    fn extract_records(
        &self,
        config: &SourceConfig,
        content: &str,
    ) -> Result<Vec<Record>, ProviderError> {
        let values: Vec<Value> =
            serde_json::from_str(content).map_err(|e| ProviderError::Parse {
                target: config.target.clone(),
                detail: e.to_string(),
            })?;

        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match Record::from_value(value) {
                Ok(mut record) => {
                    stamp_tags(&mut record, &config.tags);
                    records.push(record);
                }
                Err(e) => tracing::warn!(source = %config.key, "skipping record: {e}"),
            }
        }
        Ok(records)
    }

    fn is_open(&self, resource: &FeedFile) -> bool {
        resource
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn target(&self, resource: &FeedFile) -> String {
        resource.path.display().to_string()
    }
}

/// In-place writes may be partial, so they only hint at a change; a created
/// or renamed-into-place file is a complete publication.
fn classify(kind: &EventKind) -> Option<ResourceSignal> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => Some(ResourceSignal::Push),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            Some(ResourceSignal::ContentChanged)
        }
        _ => None,
    }
}

fn same_file_name(a: &Path, b: &Path) -> bool {
    a.file_name().is_some() && a.file_name() == b.file_name()
}

/// Source tags fill fields the record does not carry itself.
fn stamp_tags(record: &mut Record, tags: &BTreeMap<String, String>) {
    if let Value::Object(map) = &mut record.data {
        for (name, value) in tags {
            map.entry(name.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
}
