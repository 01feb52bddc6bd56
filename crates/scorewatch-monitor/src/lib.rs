//! scorewatch-monitor: dynamic monitoring engine.
//! Monitor lifecycle with retry/backoff, the live multi-source monitor,
//! and the registry that supervises monitors and drives graceful shutdown.

pub mod error;
pub mod event;
pub mod live;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod shutdown;

pub use error::{MonitorError, ProviderError, RegistryError};
pub use event::{MonitorEvent, MonitorUpdate, RegistryEvent};
pub use live::{LiveOptions, LiveSourceMonitor};
pub use monitor::{Activation, Monitor, MonitorDriver, MonitorOptions};
pub use provider::{ResourceProvider, ResourceSignal, Schedule, SignalSender, SourceResolver};
pub use registry::{FanOutSummary, MonitorRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownSignal};

pub use scorewatch_core as core;
