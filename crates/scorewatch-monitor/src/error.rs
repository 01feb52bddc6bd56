//! Error types for the monitoring engine.

use thiserror::Error;

/// Failures reported by external collaborators (schedule, resolver, provider).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("schedule query failed: {0}")]
    Schedule(String),

    #[error("failed to resolve source '{key}': {detail}")]
    Resolve { key: String, detail: String },

    #[error("failed to acquire resource for source '{key}': {detail}")]
    Acquisition { key: String, detail: String },

    #[error("failed to attach listeners to '{target}': {detail}")]
    Attach { target: String, detail: String },

    #[error("failed to fetch content from '{target}': {detail}")]
    Fetch { target: String, detail: String },

    #[error("unreadable content from '{target}': {detail}")]
    Parse { target: String, detail: String },

    #[error("failed to release resource '{target}': {detail}")]
    Release { target: String, detail: String },
}

#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The schedule reported active keys but none resolved to a watch target.
    #[error("no watchable sources ({active} active key(s), none resolvable)")]
    NoWatchableSources { active: usize },

    #[error("none of {attempted} resolved source(s) could be opened")]
    NoSourcesOpened { attempted: usize },

    #[error("refresh failed: {0}")]
    Refresh(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("monitor '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("monitor '{0}' not found")]
    NotFound(String),

    #[error("cannot start monitors during shutdown")]
    ShuttingDown,

    #[error("monitor '{name}': {source}")]
    Monitor {
        name: String,
        #[source]
        source: MonitorError,
    },
}
