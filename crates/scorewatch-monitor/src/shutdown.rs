//! Signal-driven graceful shutdown with a hard timeout.
//!
//! The first signal stops every monitor, bounded by the timeout. Any signal
//! arriving while that is in progress forces an immediate exit.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::MonitorRegistry;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every monitor stopped within the timeout.
    Clean,
    TimedOut,
    /// A repeated signal cut the graceful path short.
    Forced,
}

impl ShutdownOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::TimedOut | Self::Forced => 1,
        }
    }
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    in_progress: AtomicBool,
    timeout: Duration,
    token: CancellationToken,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancelled when shutdown begins; background loops select on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn handle_signal(
        &self,
        signal: ShutdownSignal,
        registry: &MonitorRegistry,
    ) -> ShutdownOutcome {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::warn!(%signal, "shutdown already in progress, forcing exit");
            return ShutdownOutcome::Forced;
        }

        tracing::info!(%signal, timeout_secs = self.timeout.as_secs(), "shutting down gracefully");
        self.token.cancel();

        match tokio::time::timeout(self.timeout, registry.stop_all()).await {
            Ok(_) => {
                tracing::info!("graceful shutdown completed");
                ShutdownOutcome::Clean
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "shutdown timed out, forcing exit"
                );
                ShutdownOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::error::{MonitorError, RegistryError};
    use crate::monitor::{Activation, Monitor, MonitorDriver, MonitorOptions};

    /// Teardown takes `stop_delay`.
    struct SlowStop {
        stop_delay: Duration,
    }

    #[async_trait]
    impl MonitorDriver for SlowStop {
        async fn start_monitoring(&self, _monitor: &Monitor) -> Result<Activation, MonitorError> {
            Ok(Activation::Watching)
        }

        async fn stop_monitoring(&self, _monitor: &Monitor) -> Result<(), MonitorError> {
            tokio::time::sleep(self.stop_delay).await;
            Ok(())
        }
    }

    async fn running_registry(timeout: Duration, stop_delay: Duration) -> Arc<MonitorRegistry> {
        let registry = Arc::new(MonitorRegistry::new(Arc::new(ShutdownCoordinator::new(
            timeout,
        ))));
        registry
            .add(Monitor::new("slow", SlowStop { stop_delay }, MonitorOptions::default()))
            .await
            .expect("add");
        registry.start_all().await.expect("start_all");
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn clean_shutdown_exits_zero() {
        let registry = running_registry(Duration::from_secs(30), Duration::from_secs(1)).await;
        let token = registry.shutdown().token();

        let outcome = registry.handle_signal(ShutdownSignal::Interrupt).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
        assert_eq!(outcome.exit_code(), 0);
        assert!(token.is_cancelled());
        assert_eq!(registry.stopped_monitors().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_teardown_times_out() {
        let registry = running_registry(Duration::from_secs(30), Duration::from_secs(120)).await;
        let outcome = registry.handle_signal(ShutdownSignal::Terminate).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_signal_forces() {
        let registry = running_registry(Duration::from_secs(30), Duration::from_secs(10)).await;
        let graceful = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.handle_signal(ShutdownSignal::Interrupt).await })
        };
        tokio::task::yield_now().await;
        assert!(registry.shutdown().is_shutting_down());

        let forced = registry.handle_signal(ShutdownSignal::Interrupt).await;
        assert_eq!(forced, ShutdownOutcome::Forced);
        assert_eq!(graceful.await.expect("join"), ShutdownOutcome::Clean);
    }

    #[tokio::test]
    async fn start_refused_while_shutting_down() {
        let registry = running_registry(Duration::from_secs(5), Duration::ZERO).await;
        registry.handle_signal(ShutdownSignal::Interrupt).await;
        assert!(matches!(
            registry.start_all().await,
            Err(RegistryError::ShuttingDown)
        ));
        assert!(matches!(
            registry.restart_all().await,
            Err(RegistryError::ShuttingDown)
        ));
    }
}
