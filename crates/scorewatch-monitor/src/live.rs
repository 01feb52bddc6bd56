//! Live multi-source monitor.
//!
//! Watches every source the schedule reports active through one live resource
//! each. Two trigger paths feed a single refresh pipeline:
//!
//! - a push signal refreshes immediately;
//! - a content-changed signal is debounced, then confirmed by comparing a
//!   digest of the fetched content with the last one seen.
//!
//! A refresh fetches every watched source, merges the records and hands the
//! result to the monitor for diffing. A periodic reconciliation pass brings
//! the watched set in line with the schedule; it is the only path that adds
//! or removes watched sources after start.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use scorewatch_core::{Record, RecordMerger, ResourceStatus, SourceConfig, WatchDetails};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::monitor::{Activation, Monitor, MonitorDriver};
use crate::provider::{ResourceProvider, ResourceSignal, Schedule, SourceResolver};

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub reconcile_interval: Duration,
    /// Quiet period after the last content-changed signal before a digest check.
    pub debounce_window: Duration,
    /// Delay before the first digest check of a freshly opened source.
    pub initial_digest_delay: Duration,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30 * 60),
            debounce_window: Duration::from_millis(500),
            initial_digest_delay: Duration::from_secs(2),
        }
    }
}

pub struct LiveSourceMonitor<P: ResourceProvider> {
    inner: Arc<LiveInner<P>>,
}

impl<P: ResourceProvider> Clone for LiveSourceMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct LiveInner<P: ResourceProvider> {
    schedule: Arc<dyn Schedule>,
    resolver: Arc<dyn SourceResolver>,
    provider: Arc<P>,
    merger: Arc<dyn RecordMerger>,
    options: LiveOptions,
    watch: Mutex<WatchSet<P::Resource>>,
    /// Serializes fetch → merge → update so snapshots apply in order.
    refresh_lock: Mutex<()>,
    reconcile_cancel: Mutex<Option<CancellationToken>>,
}

struct WatchSet<R> {
    sources: BTreeMap<String, Arc<WatchedSource<R>>>,
    digests: HashMap<String, String>,
    /// Keys last reported active by the schedule.
    configured: usize,
    /// Bumped on every teardown; opens begun in an older epoch are discarded.
    epoch: u64,
}

impl<R> Default for WatchSet<R> {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            digests: HashMap::new(),
            configured: 0,
            epoch: 0,
        }
    }
}

impl<R> WatchSet<R> {
    fn is_current(&self, source: &Arc<WatchedSource<R>>) -> bool {
        self.sources
            .get(&source.config.key)
            .is_some_and(|watched| Arc::ptr_eq(watched, source))
    }
}

struct WatchedSource<R> {
    config: SourceConfig,
    resource: R,
    released: AtomicBool,
    /// Stops this source's trigger task.
    cancel: CancellationToken,
}

type Watched<P> = Arc<WatchedSource<<P as ResourceProvider>::Resource>>;

impl<P: ResourceProvider> LiveSourceMonitor<P> {
    pub fn new(
        schedule: Arc<dyn Schedule>,
        resolver: Arc<dyn SourceResolver>,
        provider: Arc<P>,
        merger: Arc<dyn RecordMerger>,
        options: LiveOptions,
    ) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                schedule,
                resolver,
                provider,
                merger,
                options,
                watch: Mutex::new(WatchSet::default()),
                refresh_lock: Mutex::new(()),
                reconcile_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    pub async fn watched_keys(&self) -> Vec<String> {
        self.inner.watch.lock().await.sources.keys().cloned().collect()
    }

    // ─── Refresh ──────────────────────────────────────────────────

    /// Re-fetch every watched source and apply the merged result.
    ///
    /// Individual fetch failures are logged and skipped; the pass fails only
    /// when no source could be fetched at all.
    pub async fn refresh_all(&self, monitor: &Monitor) -> Result<(), MonitorError> {
        let _serial = self.inner.refresh_lock.lock().await;
        let (sources, epoch) = {
            let watch = self.inner.watch.lock().await;
            (watch.sources.clone(), watch.epoch)
        };
        if sources.is_empty() {
            tracing::debug!(monitor = %monitor.name(), "nothing watched, refresh skipped");
            return Ok(());
        }

        let fetched = join_all(sources.values().map(|source| self.fetch_records(source))).await;
        let succeeded = fetched.iter().filter(|r| r.is_some()).count();
        if succeeded == 0 {
            return Err(MonitorError::Refresh(format!(
                "all {} source fetch(es) failed",
                sources.len()
            )));
        }

        if self.inner.watch.lock().await.epoch != epoch {
            tracing::debug!(monitor = %monitor.name(), "watch set torn down, discarding refresh");
            return Ok(());
        }
        let snapshot = self
            .inner
            .merger
            .merge(fetched.into_iter().flatten().flatten().collect());
        tracing::debug!(
            monitor = %monitor.name(),
            sources = succeeded,
            records = snapshot.len(),
            "full refresh fetched"
        );
        monitor.handle_update(snapshot).await;
        Ok(())
    }

    /// Refresh triggered by one source. A failure fetching the triggering
    /// source is the caller's error; sibling failures are skipped.
    async fn refresh_from(&self, monitor: &Monitor, trigger: &Watched<P>) -> Result<(), MonitorError> {
        let _serial = self.inner.refresh_lock.lock().await;
        let sources = {
            let watch = self.inner.watch.lock().await;
            if !watch.is_current(trigger) {
                return Ok(());
            }
            watch.sources.clone()
        };

        let provider = &self.inner.provider;
        let content = provider.fetch_content(&trigger.resource).await?;
        let mut own = Some(provider.extract_records(&trigger.config, &content)?);

        let fetches = sources.values().map(|source| {
            let preset = if Arc::ptr_eq(source, trigger) {
                own.take()
            } else {
                None
            };
            async move {
                match preset {
                    Some(records) => Some(records),
                    None => self.fetch_records(source).await,
                }
            }
        });
        let records: Vec<Record> = join_all(fetches).await.into_iter().flatten().flatten().collect();

        if !self.inner.watch.lock().await.is_current(trigger) {
            tracing::debug!(
                monitor = %monitor.name(),
                source = %trigger.config.key,
                "source released during refresh, discarding"
            );
            return Ok(());
        }
        monitor.handle_update(self.inner.merger.merge(records)).await;
        Ok(())
    }

    async fn fetch_records(&self, source: &Watched<P>) -> Option<Vec<Record>> {
        let provider = &self.inner.provider;
        let fetched = provider
            .fetch_content(&source.resource)
            .await
            .and_then(|content| provider.extract_records(&source.config, &content));
        match fetched {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(source = %source.config.key, "skipping source: {e}");
                None
            }
        }
    }

    async fn refresh_or_report(&self, monitor: &Monitor, source: &Watched<P>) {
        if let Err(e) = self.refresh_from(monitor, source).await {
            tracing::warn!(
                monitor = %monitor.name(),
                source = %source.config.key,
                "refresh failed: {e}"
            );
            monitor.handle_error(e).await;
        }
    }

    /// Debounced path: refresh only when the content digest moved. The first
    /// digest seen for a source is stored as its baseline.
    async fn check_digest(&self, monitor: &Monitor, source: &Watched<P>) {
        let provider = &self.inner.provider;
        let key = &source.config.key;
        let content = match provider.fetch_content(&source.resource).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(source = %key, "digest fetch failed: {e}");
                return;
            }
        };
        let digest = provider.compute_digest(&content);

        let changed = {
            let mut watch = self.inner.watch.lock().await;
            if !watch.is_current(source) {
                return;
            }
            let previous = watch.digests.insert(key.clone(), digest.clone());
            previous.is_some_and(|prev| prev != digest)
        };
        if changed {
            tracing::info!(source = %key, "content digest changed");
            self.refresh_or_report(monitor, source).await;
        } else {
            tracing::debug!(source = %key, "content digest unchanged");
        }
    }

    // ─── Sources ──────────────────────────────────────────────────

    /// Resolve keys to watchable configs; unusable keys are logged and dropped.
    async fn resolve_all<'a, I>(&self, keys: I) -> Vec<SourceConfig>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let resolver = &self.inner.resolver;
        let resolved = join_all(keys.into_iter().map(|key| async move {
            match resolver.resolve(key).await {
                Ok(Some(config)) if config.is_watchable() => Some(config),
                Ok(Some(_)) => {
                    tracing::warn!(source = %key, "source has no usable watch target, skipping");
                    None
                }
                Ok(None) => {
                    tracing::warn!(source = %key, "unknown source, skipping");
                    None
                }
                Err(e) => {
                    tracing::warn!(source = %key, "{e}");
                    None
                }
            }
        }))
        .await;
        resolved.into_iter().flatten().collect()
    }

    /// Acquire, wire triggers and fetch initial records for one source.
    /// `None` when the source could not be opened or the activation it
    /// belonged to has been torn down meanwhile.
    async fn open_source(
        &self,
        monitor: &Monitor,
        config: SourceConfig,
        epoch: u64,
    ) -> Option<Vec<Record>> {
        let provider = &self.inner.provider;
        let key = config.key.clone();

        let resource = match provider.acquire(&config).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!(source = %key, "{e}");
                return None;
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let attached = provider.attach_listeners(&resource, tx);
        let source = Arc::new(WatchedSource {
            config,
            resource,
            released: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        if let Err(e) = attached {
            tracing::warn!(source = %key, "{e}");
            self.release_source(&source).await;
            return None;
        }

        let initial = provider.fetch_content(&source.resource).await.and_then(|content| {
            let records = provider.extract_records(&source.config, &content)?;
            Ok((records, provider.compute_digest(&content)))
        });
        let (records, digest) = match initial {
            Ok((records, digest)) => (records, Some(digest)),
            Err(e) => {
                tracing::warn!(source = %key, "initial fetch failed: {e}");
                (Vec::new(), None)
            }
        };

        {
            let mut watch = self.inner.watch.lock().await;
            if watch.epoch != epoch || watch.sources.contains_key(&key) {
                drop(watch);
                tracing::debug!(source = %key, "open superseded, releasing");
                self.release_source(&source).await;
                return None;
            }
            watch.sources.insert(key.clone(), Arc::clone(&source));
            if let Some(digest) = digest {
                watch.digests.insert(key.clone(), digest);
            }
        }

        tracing::info!(
            source = %key,
            target = %provider.target(&source.resource),
            records = records.len(),
            "watching source"
        );
        self.spawn_triggers(monitor.clone(), source, rx);
        Some(records)
    }

    /// Idempotent: cancels the trigger task and releases the resource once.
    async fn release_source(&self, source: &Watched<P>) {
        source.cancel.cancel();
        if source.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.provider.release(&source.resource).await {
            tracing::warn!(source = %source.config.key, "{e}");
        }
    }

    /// Release everything and invalidate in-flight opens.
    async fn teardown(&self) -> usize {
        if let Some(token) = self.inner.reconcile_cancel.lock().await.take() {
            token.cancel();
        }
        let drained: Vec<Watched<P>> = {
            let mut watch = self.inner.watch.lock().await;
            watch.epoch += 1;
            watch.digests.clear();
            std::mem::take(&mut watch.sources).into_values().collect()
        };
        join_all(drained.iter().map(|source| self.release_source(source))).await;
        drained.len()
    }

    // ─── Tasks ────────────────────────────────────────────────────

    fn spawn_triggers(
        &self,
        monitor: Monitor,
        source: Watched<P>,
        mut signals: mpsc::UnboundedReceiver<ResourceSignal>,
    ) {
        let this = self.clone();
        let debounce = self.inner.options.debounce_window;
        let mut digest_due = Some(Instant::now() + self.inner.options.initial_digest_delay);
        tokio::spawn(async move {
            let mut signals_open = true;
            loop {
                tokio::select! {
                    () = source.cancel.cancelled() => break,
                    () = tokio::time::sleep_until(digest_due.unwrap_or_else(Instant::now)),
                        if digest_due.is_some() =>
                    {
                        digest_due = None;
                        this.check_digest(&monitor, &source).await;
                    }
                    signal = signals.recv(), if signals_open => match signal {
                        Some(ResourceSignal::Push) => {
                            tracing::debug!(source = %source.config.key, "push received");
                            this.refresh_or_report(&monitor, &source).await;
                        }
                        Some(ResourceSignal::ContentChanged) => {
                            digest_due = Some(Instant::now() + debounce);
                        }
                        None => signals_open = false,
                    },
                }
            }
            tracing::debug!(source = %source.config.key, "trigger task stopped");
        });
    }

    async fn spawn_reconciler(&self, monitor: &Monitor) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.reconcile_cancel.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        let this = self.clone();
        let monitor = monitor.clone();
        let period = self.inner.options.reconcile_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => this.reconcile(&monitor).await,
                }
            }
            tracing::debug!(monitor = %monitor.name(), "reconciler stopped");
        });
    }

    // ─── Reconciliation ───────────────────────────────────────────

    /// Bring the watched set in line with the schedule.
    ///
    /// Sources no longer active are released; newly active ones are opened.
    /// The monitor stops itself when the schedule reports nothing active or
    /// when none of the active sources could be kept open. A schedule failure
    /// leaves everything as is until the next pass.
    pub async fn reconcile(&self, monitor: &Monitor) {
        let name = monitor.name();
        let active = match self.inner.schedule.active_source_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(monitor = %name, "reconciliation skipped: {e}");
                return;
            }
        };

        let (to_stop, to_start, epoch) = {
            let mut watch = self.inner.watch.lock().await;
            watch.configured = active.len();
            let stale: Vec<String> = watch
                .sources
                .keys()
                .filter(|key| !active.contains(*key))
                .cloned()
                .collect();
            let mut to_stop = Vec::with_capacity(stale.len());
            for key in stale {
                watch.digests.remove(&key);
                if let Some(source) = watch.sources.remove(&key) {
                    to_stop.push(source);
                }
            }
            let to_start: Vec<String> = active
                .iter()
                .filter(|key| !watch.sources.contains_key(*key))
                .cloned()
                .collect();
            (to_stop, to_start, watch.epoch)
        };

        for source in &to_stop {
            tracing::info!(monitor = %name, source = %source.config.key, "source no longer active");
        }
        join_all(to_stop.iter().map(|source| self.release_source(source))).await;

        if active.is_empty() {
            tracing::info!(monitor = %name, "no active sources left, stopping monitor");
            monitor.stop().await;
            return;
        }

        let opened = if to_start.is_empty() {
            0
        } else {
            let configs = self.resolve_all(&to_start).await;
            join_all(
                configs
                    .into_iter()
                    .map(|config| self.open_source(monitor, config, epoch)),
            )
            .await
            .into_iter()
            .filter(Option::is_some)
            .count()
        };

        {
            let watch = self.inner.watch.lock().await;
            if watch.epoch == epoch && watch.sources.is_empty() {
                drop(watch);
                tracing::warn!(
                    monitor = %name,
                    active = active.len(),
                    "no active source could be opened, stopping monitor"
                );
                monitor.stop().await;
                return;
            }
        }

        if to_stop.is_empty() && opened == 0 {
            tracing::debug!(monitor = %name, "watched sources match schedule");
            return;
        }
        tracing::info!(
            monitor = %name,
            released = to_stop.len(),
            opened,
            "watched sources reconciled"
        );
        if let Err(e) = self.refresh_all(monitor).await {
            tracing::warn!(monitor = %name, "refresh after reconciliation failed: {e}");
        }
    }
}

#[async_trait]
impl<P: ResourceProvider> MonitorDriver for LiveSourceMonitor<P> {
    async fn start_monitoring(&self, monitor: &Monitor) -> Result<Activation, MonitorError> {
        let name = monitor.name();
        let leftovers = self.teardown().await;
        if leftovers > 0 {
            tracing::debug!(monitor = %name, released = leftovers, "released leftover resources");
        }

        let active = self.inner.schedule.active_source_keys().await?;
        let epoch = {
            let mut watch = self.inner.watch.lock().await;
            watch.configured = active.len();
            watch.epoch
        };
        if active.is_empty() {
            tracing::info!(monitor = %name, "schedule reports no active sources");
            self.inner.provider.release_idle().await;
            return Ok(Activation::Idle);
        }

        let configs = self.resolve_all(&active).await;
        if configs.is_empty() {
            return Err(MonitorError::NoWatchableSources {
                active: active.len(),
            });
        }

        // Held until the snapshot is seeded so early trigger refreshes diff
        // against the initial load.
        let _serial = self.inner.refresh_lock.lock().await;
        let attempted = configs.len();
        let opened = join_all(
            configs
                .into_iter()
                .map(|config| self.open_source(monitor, config, epoch)),
        )
        .await;
        let watched = opened.iter().filter(|r| r.is_some()).count();
        if watched == 0 {
            return Err(MonitorError::NoSourcesOpened { attempted });
        }
        let snapshot = self
            .inner
            .merger
            .merge(opened.into_iter().flatten().flatten().collect());
        tracing::info!(
            monitor = %name,
            sources = watched,
            records = snapshot.len(),
            "live monitoring started"
        );
        monitor.seed_snapshot(snapshot).await;

        self.spawn_reconciler(monitor).await;
        Ok(Activation::Watching)
    }

    async fn stop_monitoring(&self, monitor: &Monitor) -> Result<(), MonitorError> {
        let released = self.teardown().await;
        tracing::info!(monitor = %monitor.name(), released, "live resources released");
        Ok(())
    }

    async fn watch_details(&self) -> Option<WatchDetails> {
        let provider = &self.inner.provider;
        let watch = self.inner.watch.lock().await;
        let resources = watch
            .sources
            .iter()
            .map(|(key, source)| {
                let status = ResourceStatus {
                    is_open: !source.released.load(Ordering::SeqCst)
                        && provider.is_open(&source.resource),
                    target: provider.target(&source.resource),
                    last_digest: watch.digests.get(key).cloned(),
                };
                (key.clone(), status)
            })
            .collect();
        Some(WatchDetails {
            watched_resources: watch.sources.len(),
            configured_sources: watch.configured,
            resources,
        })
    }
}
