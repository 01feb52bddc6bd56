//! `scorewatch run`: wires config → live monitor → registry, runs the periodic
//! housekeeping tasks and waits for shutdown signals.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scorewatch_core::StatusPriorityMerge;
use scorewatch_monitor::{
    LiveSourceMonitor, Monitor, MonitorRegistry, ShutdownCoordinator, ShutdownOutcome,
    ShutdownSignal,
};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::cli::RunOpts;
use crate::config::{AppConfig, RuntimeSection};
use crate::feeds::{ConfigResolver, ConfigSchedule, FileFeedProvider};
use crate::recorder::ChangeRecorder;

type FeedMonitor = LiveSourceMonitor<FileFeedProvider>;

/// Run until a shutdown signal; returns the process exit code.
pub async fn cmd_run(config_path: &Path, opts: RunOpts) -> anyhow::Result<i32> {
    let config = AppConfig::load(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        sources = config.sources.len(),
        active = config.active_keys().len(),
        "configuration loaded"
    );

    let live: FeedMonitor = LiveSourceMonitor::new(
        Arc::new(ConfigSchedule::new(config_path)),
        Arc::new(ConfigResolver::new(config_path)),
        Arc::new(FileFeedProvider::new()),
        Arc::new(StatusPriorityMerge::new()),
        config.live_options(),
    );
    let monitor = Monitor::new(
        config.monitor.name.clone(),
        live.clone(),
        config.monitor_options(),
    );

    let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout()));
    let registry = Arc::new(MonitorRegistry::new(Arc::clone(&shutdown)));

    let mut recorder = ChangeRecorder::new(
        registry.subscribe(),
        opts.changes_out.as_deref(),
        shutdown.token(),
    )
    .with_context(|| "failed to open changes file")?;
    let recorder_handle = tokio::spawn(async move { recorder.run().await });

    registry.add(monitor.clone()).await?;
    registry.start_all().await?;

    let housekeeping_handle = tokio::spawn(run_housekeeping(
        Arc::clone(&registry),
        live,
        monitor,
        config.runtime.clone(),
        shutdown.token(),
    ));

    let outcome = wait_for_shutdown(&registry).await?;
    if outcome == ShutdownOutcome::Clean {
        let _ = housekeeping_handle.await;
        let _ = recorder_handle.await;
    }
    tracing::info!(outcome = ?outcome, "scorewatch stopped");
    Ok(outcome.exit_code())
}

/// First signal starts a graceful shutdown; a second one while it runs forces.
async fn wait_for_shutdown(registry: &Arc<MonitorRegistry>) -> anyhow::Result<ShutdownOutcome> {
    let mut signals = Signals::register()?;
    let first = signals.recv().await;
    tracing::info!(signal = %first, "received shutdown signal");

    let mut graceful = {
        let registry = Arc::clone(registry);
        tokio::spawn(async move { registry.handle_signal(first).await })
    };
    tokio::select! {
        joined = &mut graceful => Ok(joined.unwrap_or(ShutdownOutcome::TimedOut)),
        second = signals.recv() => Ok(registry.handle_signal(second).await),
    }
}

struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    fn register() -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) -> ShutdownSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                _ = self.terminate.recv() => ShutdownSignal::Terminate,
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            ShutdownSignal::Interrupt
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Status report, periodic full refetch and periodic restart.
async fn run_housekeeping(
    registry: Arc<MonitorRegistry>,
    live: FeedMonitor,
    monitor: Monitor,
    runtime: RuntimeSection,
    cancel: CancellationToken,
) {
    let mut status = ticker(Duration::from_secs(runtime.status_interval_secs));
    let mut refetch = ticker(Duration::from_secs(runtime.refetch_interval_secs));
    let mut restart = ticker(Duration::from_secs(runtime.restart_interval_secs));

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = status.tick() => {
                let report = registry.status().await;
                tracing::info!(
                    running = report.running,
                    total = report.total,
                    "monitor status"
                );
                for m in &report.monitors {
                    tracing::debug!(
                        monitor = %m.name,
                        state = %m.state,
                        records = m.record_count,
                        retries = m.retry_count,
                        watched = m.watch.as_ref().map_or(0, |w| w.watched_resources),
                        "monitor detail"
                    );
                }
            }
            _ = refetch.tick() => {
                if monitor.is_running() {
                    tracing::info!(monitor = %monitor.name(), "periodic full refetch");
                    if let Err(e) = live.refresh_all(&monitor).await {
                        tracing::warn!(monitor = %monitor.name(), "periodic refetch failed: {e}");
                    }
                }
            }
            _ = restart.tick() => {
                tracing::info!("periodic monitoring restart");
                if let Err(e) = registry.restart_all().await {
                    tracing::warn!("periodic restart skipped: {e}");
                }
            }
        }
    }
    tracing::debug!("housekeeping stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorewatch_core::MonitorState;

    #[tokio::test(start_paused = true)]
    async fn housekeeping_restart_revives_idle_monitor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("scorewatch.toml");
        std::fs::write(&config_path, "").expect("write empty config");

        let config = AppConfig::load(&config_path).expect("load");
        let live: FeedMonitor = LiveSourceMonitor::new(
            Arc::new(ConfigSchedule::new(&config_path)),
            Arc::new(ConfigResolver::new(&config_path)),
            Arc::new(FileFeedProvider::new()),
            Arc::new(StatusPriorityMerge::new()),
            config.live_options(),
        );
        let monitor = Monitor::new("scores", live.clone(), config.monitor_options());
        let registry = Arc::new(MonitorRegistry::new(Arc::new(ShutdownCoordinator::default())));
        registry.add(monitor.clone()).await.expect("add");
        registry.start_all().await.expect("start_all");
        assert_eq!(monitor.state(), MonitorState::Stopped, "nothing scheduled");

        std::fs::write(dir.path().join("atp.json"), r#"[{"id": "m1"}]"#).expect("feed");
        std::fs::write(&config_path, "[[sources]]\nkey = \"atp\"\ntarget = \"atp.json\"\n")
            .expect("schedule atp");

        let cancel = CancellationToken::new();
        let runtime = RuntimeSection {
            restart_interval_secs: 10,
            ..RuntimeSection::default()
        };
        let handle = tokio::spawn(run_housekeeping(
            Arc::clone(&registry),
            live,
            monitor.clone(),
            runtime,
            cancel.clone(),
        ));

        let mut states = monitor.state_changes();
        states
            .wait_for(|s| *s == MonitorState::Running)
            .await
            .expect("state channel open");
        assert_eq!(monitor.snapshot().await.len(), 1);

        cancel.cancel();
        handle.await.expect("housekeeping exits");
        monitor.stop().await;
    }
}
