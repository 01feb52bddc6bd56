//! Collaborator seams for the live monitor.
//!
//! The schedule says which sources should be watched right now, the resolver
//! turns a key into a watch target, and the resource provider owns the live
//! resources and turns their content into records. Production implementations
//! live in the runtime crate; tests inject fakes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use scorewatch_core::{Record, SourceConfig};
use tokio::sync::mpsc;

use crate::error::ProviderError;

/// Raw trigger raised by a live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSignal {
    /// Explicit data push; refresh immediately.
    Push,
    /// Content may have changed; debounce, then verify with a digest.
    ContentChanged,
}

/// Unbounded so providers can signal from synchronous callbacks.
pub type SignalSender = mpsc::UnboundedSender<ResourceSignal>;

#[async_trait]
pub trait Schedule: Send + Sync {
    /// Source keys that should currently be watched.
    async fn active_source_keys(&self) -> Result<BTreeSet<String>, ProviderError>;
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// `Ok(None)` when the key is unknown.
    async fn resolve(&self, key: &str) -> Result<Option<SourceConfig>, ProviderError>;
}

#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    async fn acquire(&self, config: &SourceConfig) -> Result<Self::Resource, ProviderError>;

    /// Called at most once per acquired resource.
    async fn release(&self, resource: &Self::Resource) -> Result<(), ProviderError>;

    async fn fetch_content(&self, resource: &Self::Resource) -> Result<String, ProviderError>;

    /// Wire the resource's native notifications into `signals`.
    fn attach_listeners(
        &self,
        resource: &Self::Resource,
        signals: SignalSender,
    ) -> Result<(), ProviderError>;

    fn compute_digest(&self, content: &str) -> String;

    /// Unparseable content is an error, not an empty record list, so a
    /// half-written source never wipes the snapshot.
    fn extract_records(
        &self,
        config: &SourceConfig,
        content: &str,
    ) -> Result<Vec<Record>, ProviderError>;

    fn is_open(&self, resource: &Self::Resource) -> bool;

    fn target(&self, resource: &Self::Resource) -> String;

    /// Free shared capacity when nothing is scheduled.
    async fn release_idle(&self) {}
}
