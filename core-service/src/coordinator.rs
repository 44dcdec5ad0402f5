//! # Cache Coordinator
//!
//! Single entry point for hosts. The coordinator owns every engine component,
//! chooses an initialization strategy, and turns component failures into
//! structured results so that reads never fail outright.
//!
//! ## Read path
//!
//! ```text
//! fresh cache ─► (modern path) stale + background revalidation
//!             ─► remote fetch when not offline
//!             ─► stale entry ─► last known entry ─► newest history entry ─► None
//! ```
//!
//! An offline miss also queues a coalesced `ContentRefresh` for the local date.
//!
//! ## Background work
//!
//! Every task (connectivity listener, refresh timer, timezone watch, periodic
//! maintenance and metrics, drain retries) runs under a child of one
//! cancellation token, so [`CacheCoordinator::dispose`] stops all of them.

use async_trait::async_trait;
use bridge_traits::{
    background::LifecycleObserver,
    content::{Content, ContentProvider},
    network::{ConnectivityMonitor, ConnectivityStatus},
    time::{Clock, TimezoneProvider},
};
use chrono::{DateTime, NaiveDate, Utc};
use core_cache::{
    persistence::keys, to_chrono, ActionKind, ActionSyncer, CacheEntry, CacheError,
    ContentStats, ContentStore, DrainReport, HealthService, HealthSnapshot, IntegrityReport,
    InvalidationOutcome, MaintenanceService, OfflineQueue, PendingAction, PersistentStore,
    QueueStats, RefreshScheduler, ScheduleState, SyncOutcomeLog,
};
use core_migration::{MigrationController, MigrationState};
use core_runtime::{
    config::EngineSettings,
    events::{ContentEvent, EngineEvent, EventBus, Receiver, DEFAULT_EVENT_BUFFER_SIZE},
};
use core_strategy::{
    select_initialization, select_optimization, InitializationContext, InitializationKind,
    InitializationReport, InitializationTarget, OptimizationContext, OptimizationOutcome,
    OptimizationTarget, StrategyError,
};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::metrics::{MetricsAggregator, MetricsReport, PerformanceTracker};
use crate::EngineDependencies;

/// Where served content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Fresh, version-current cache entry
    Cache,
    /// Fetched during this call
    Network,
    /// Past expiry but inside the grace window
    Stale,
    /// Current entry outside the grace window
    LastKnown,
    /// Newest entry from history
    History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedContent {
    pub entry: CacheEntry,
    pub source: ContentSource,
    pub is_stale: bool,
    pub is_fallback: bool,
}

impl ServedContent {
    fn new(entry: CacheEntry, source: ContentSource) -> Self {
        let is_fallback = matches!(source, ContentSource::LastKnown | ContentSource::History);
        let is_stale = is_fallback || source == ContentSource::Stale;
        let entry = if is_fallback { entry.as_fallback() } else { entry };
        Self {
            entry,
            source,
            is_stale,
            is_fallback,
        }
    }

    pub fn content(&self) -> &Content {
        &self.entry.content
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Delivered immediately
    Synced,
    /// Stored for delivery when connectivity returns
    Queued {
        pending: usize,
        coalesced: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evicted: Option<Uuid>,
    },
    /// Neither delivered nor stored
    Rejected { reason: String },
    /// Engine already disposed
    Disposed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub action_id: Option<Uuid>,
    pub status: ActionStatus,
}

impl ActionReceipt {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.status,
            ActionStatus::Synced | ActionStatus::Queued { .. }
        )
    }
}

/// Outcome of the last initialization, persisted for strategy selection on
/// the next launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationRecord {
    pub last_initialized_at: Option<DateTime<Utc>>,
    pub last_strategy: Option<InitializationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub snapshot: HealthSnapshot,
    pub integrity: IntegrityReport,
    pub content: ContentStats,
    pub queue: QueueStats,
    pub schedule: Option<ScheduleState>,
    pub migration: MigrationState,
    pub initialization: Option<InitializationReport>,
    pub disposed: bool,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    settings: EngineSettings,
    provider: Arc<dyn ContentProvider>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    lifecycle: Option<Arc<dyn LifecycleObserver>>,
    syncer: Arc<dyn ActionSyncer>,
    clock: Arc<dyn Clock>,
    timezone: Arc<dyn TimezoneProvider>,
    subject_id: String,
    persistence: PersistentStore,
    content: Arc<ContentStore>,
    queue: OfflineQueue,
    scheduler: RefreshScheduler,
    maintenance: Arc<MaintenanceService>,
    health: Arc<HealthService>,
    migration: Arc<MigrationController>,
    metrics: Arc<MetricsAggregator>,
    performance: Arc<PerformanceTracker>,
    events: EventBus,
    shutdown: CancellationToken,
    init: Mutex<Option<InitializationReport>>,
    disposed: AtomicBool,
    revalidating: AtomicBool,
    connectivity_subscribed: AtomicBool,
    timers_armed: AtomicBool,
    retry_scheduled: AtomicBool,
}

impl CacheCoordinator {
    /// Build a coordinator from explicit dependencies.
    ///
    /// Nothing is loaded or spawned until [`initialize`](Self::initialize)
    /// or the first operation that needs it.
    pub fn new(deps: EngineDependencies, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;

        let events = deps
            .event_bus
            .unwrap_or_else(|| EventBus::new(DEFAULT_EVENT_BUFFER_SIZE));
        let clock = deps.clock;
        let persistence = PersistentStore::new(deps.store);
        let shutdown = CancellationToken::new();

        let content = Arc::new(
            ContentStore::new(persistence.clone(), clock.clone(), settings.cache.clone())
                .with_events(events.clone()),
        );
        let queue = OfflineQueue::with_events(
            persistence.clone(),
            clock.clone(),
            settings.queue.clone(),
            events.clone(),
        );
        let scheduler = RefreshScheduler::with_events(
            clock.clone(),
            deps.timezone.clone(),
            persistence.clone(),
            settings.scheduler.clone(),
            shutdown.clone(),
            events.clone(),
        );
        let maintenance = Arc::new(
            MaintenanceService::new(
                content.clone(),
                queue.clone(),
                clock.clone(),
                &settings.cache,
                &settings.queue,
            )
            .with_events(events.clone()),
        );
        let health = Arc::new(
            HealthService::new(
                content.clone(),
                queue.clone(),
                Arc::new(SyncOutcomeLog::new(settings.health.outcome_window)),
                clock.clone(),
            )
            .with_events(events.clone()),
        );
        let migration = Arc::new(
            MigrationController::new(persistence.clone(), clock.clone(), settings.migration.clone())
                .with_events(events.clone()),
        );
        let performance = Arc::new(PerformanceTracker::new(settings.health.outcome_window));
        let metrics = Arc::new(MetricsAggregator::new(
            content.clone(),
            queue.clone(),
            scheduler.clone(),
            health.clone(),
            migration.clone(),
            performance.clone(),
            clock.clone(),
            settings.metrics.clone(),
        ));

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                settings,
                provider: deps.content_provider,
                connectivity: deps.connectivity,
                lifecycle: deps.lifecycle,
                syncer: deps.action_syncer,
                clock,
                timezone: deps.timezone,
                subject_id: deps.subject_id,
                persistence,
                content,
                queue,
                scheduler,
                maintenance,
                health,
                migration,
                metrics,
                performance,
                events,
                shutdown,
                init: Mutex::new(None),
                disposed: AtomicBool::new(false),
                revalidating: AtomicBool::new(false),
                connectivity_subscribed: AtomicBool::new(false),
                timers_armed: AtomicBool::new(false),
                retry_scheduled: AtomicBool::new(false),
            }),
        })
    }

    /// Restore state and start background work using the strategy that fits
    /// the launch context.
    ///
    /// Idempotent: later calls return the first successful report. A failed
    /// initialization is recorded so the next launch selects `Recovery`.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<InitializationReport> {
        let inner = &self.inner;
        inner.ensure_active()?;

        let mut slot = inner.init.lock().await;
        if let Some(report) = slot.as_ref() {
            return Ok(report.clone());
        }

        let record: InitializationRecord = inner
            .persistence
            .load_optional(keys::INIT_RECORD)
            .await?
            .unwrap_or_default();
        let now = inner.clock.now();
        let context = InitializationContext {
            test_mode: inner.settings.test_mode,
            previous_error: record.last_error.clone(),
            last_initialized_at: record.last_initialized_at,
            now,
            warm_restart_window: to_chrono(inner.settings.initialization.warm_restart_window()),
            is_backgrounded: inner.is_backgrounded().await,
        };
        let kind = select_initialization(&context);
        info!(strategy = %kind, "Initializing cache engine");

        let target = EngineTarget {
            inner: Arc::clone(inner),
        };
        let result = kind.strategy().execute(&target).await;

        let record = InitializationRecord {
            last_initialized_at: Some(now),
            last_strategy: Some(kind),
            last_error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(error) = inner.persistence.save(keys::INIT_RECORD, &record).await {
            warn!(error = %error, "Failed to persist initialization record");
        }

        let report = result?;
        info!(
            strategy = %report.kind,
            steps = report.steps.len(),
            repaired = report.repaired,
            "Cache engine initialized"
        );
        *slot = Some(report.clone());
        Ok(report)
    }

    /// Today's content, or `None` only when nothing has ever been cached and
    /// the content cannot be fetched.
    #[instrument(skip(self))]
    pub async fn get_today_content(&self, force_refresh: bool) -> Option<ServedContent> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return inner.serve_cached().await;
        }
        if let Err(error) = self.initialize().await {
            warn!(error = %error, "Serving without full initialization");
        }

        if !force_refresh {
            if let Some(entry) = inner.content.get(false).await {
                return Some(ServedContent::new(entry, ContentSource::Cache));
            }
            if inner.settings.features.enable_background_revalidation
                && inner.migration.use_modern_path(&inner.subject_id).await
            {
                if let Some(entry) = inner.content.get(true).await {
                    inner.spawn_revalidation();
                    inner.emit(ContentEvent::ServedStale {
                        content_id: entry.content_id().to_string(),
                    });
                    return Some(ServedContent::new(entry, ContentSource::Stale));
                }
            }
        }

        inner.fetch_or_fallback().await
    }

    /// Deliver a user action now when online, otherwise queue it.
    ///
    /// A failed immediate delivery falls back to the queue.
    #[instrument(skip(self, kind), fields(kind = kind.label()))]
    pub async fn record_offline_action(&self, kind: ActionKind) -> ActionReceipt {
        let inner = &self.inner;
        if inner.is_disposed() {
            return ActionReceipt {
                action_id: None,
                status: ActionStatus::Disposed,
            };
        }
        if let Err(error) = self.initialize().await {
            warn!(error = %error, "Recording action without full initialization");
        }

        let action = PendingAction::new(kind, inner.clock.now(), inner.settings.queue.max_retries);
        if inner.connectivity_status().await != ConnectivityStatus::Offline {
            match inner.engine_syncer().sync(&action).await {
                Ok(()) => {
                    debug!(action_id = %action.action_id, "Action delivered");
                    return ActionReceipt {
                        action_id: Some(action.action_id),
                        status: ActionStatus::Synced,
                    };
                }
                Err(error) => {
                    warn!(
                        action_id = %action.action_id,
                        error = %error,
                        "Immediate delivery failed, queueing"
                    );
                }
            }
        }

        match inner.queue.enqueue_action(action).await {
            Ok(outcome) => ActionReceipt {
                action_id: Some(outcome.action_id),
                status: ActionStatus::Queued {
                    pending: outcome.pending,
                    coalesced: outcome.coalesced,
                    evicted: outcome.evicted.map(|a| a.action_id),
                },
            },
            Err(error) => {
                warn!(error = %error, "Failed to queue action");
                ActionReceipt {
                    action_id: None,
                    status: ActionStatus::Rejected {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }

    /// Replay queued actions now.
    ///
    /// Failed actions stay queued and a retry is scheduled with the backoff
    /// policy.
    #[instrument(skip(self))]
    pub async fn drain_pending_actions(&self) -> Result<DrainReport> {
        self.inner.ensure_active()?;
        Ok(self.inner.drain_cycle().await)
    }

    /// Bump the cache version so the next read refetches. The current entry
    /// stays available as a stale fallback.
    #[instrument(skip(self))]
    pub async fn invalidate_cache(&self, reason: &str) -> Result<InvalidationOutcome> {
        self.inner.ensure_active()?;
        Ok(self.inner.maintenance.invalidate_cache(reason).await?)
    }

    pub async fn get_health_report(&self) -> HealthReport {
        let inner = &self.inner;
        HealthReport {
            snapshot: inner.health.health_score().await,
            integrity: inner.health.integrity_check().await,
            content: inner.content.stats().await,
            queue: inner.queue.stats().await,
            schedule: inner.scheduler.state().await,
            migration: inner.migration.state().await,
            initialization: inner.init.lock().await.clone(),
            disposed: inner.is_disposed(),
        }
    }

    /// Collect metrics and evaluate automatic rollback against them.
    #[instrument(skip(self))]
    pub async fn get_metrics_report(&self) -> MetricsReport {
        self.inner.collect_metrics().await
    }

    /// Select and run an optimization strategy for `context`.
    #[instrument(skip(self))]
    pub async fn run_optimization(&self, context: OptimizationContext) -> Result<OptimizationOutcome> {
        self.inner.ensure_active()?;
        let kind = select_optimization(&context);
        let target = EngineTarget {
            inner: Arc::clone(&self.inner),
        };
        Ok(kind.strategy().execute(&target).await?)
    }

    /// Migration control surface for operations tooling.
    pub fn migration(&self) -> &Arc<MigrationController> {
        &self.inner.migration
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Cached entry without any network access.
    pub async fn peek_cached(&self, allow_stale: bool) -> Option<CacheEntry> {
        self.inner.content.get(allow_stale).await
    }

    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.inner.queue.peek_all().await
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Cancel every timer and listener. Later calls resolve harmlessly.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.shutdown.cancel();
        inner.scheduler.cancel().await;
        info!("Cache engine disposed");
    }
}

impl CoordinatorInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: ContentEvent) {
        let _ = self.events.emit(EngineEvent::Content(event));
    }

    fn engine_syncer(self: &Arc<Self>) -> Arc<dyn ActionSyncer> {
        Arc::new(EngineSyncer {
            inner: Arc::clone(self),
        })
    }

    async fn is_backgrounded(&self) -> bool {
        match &self.lifecycle {
            Some(observer) => match observer.get_state().await {
                Ok(state) => !state.is_foreground(),
                Err(error) => {
                    debug!(error = %error, "Lifecycle state unavailable");
                    false
                }
            },
            None => false,
        }
    }

    /// `Unknown` is returned when the monitor fails; callers still attempt
    /// the network in that case.
    async fn connectivity_status(&self) -> ConnectivityStatus {
        match self.connectivity.current_status().await {
            Ok(status) => status,
            Err(error) => {
                debug!(error = %error, "Connectivity status unavailable");
                ConnectivityStatus::Unknown
            }
        }
    }

    /// Calendar date at the device's current offset.
    fn local_today(&self) -> NaiveDate {
        let now = self.clock.now();
        match self.timezone.offset_at(now) {
            Ok(offset) => now.with_timezone(&offset).date_naive(),
            Err(error) => {
                warn!(error = %error, "Using UTC date");
                now.date_naive()
            }
        }
    }

    /// Fetch today's content and store it.
    ///
    /// `Ok(None)` means the backend has nothing published for today.
    async fn refresh_from_remote(&self) -> core_cache::Result<Option<CacheEntry>> {
        let date = self.local_today();
        let started = Instant::now();
        let fetched = self.provider.fetch(date).await;
        self.record_outcome(started.elapsed(), fetched.is_ok());

        let content = fetched.map_err(|error| CacheError::FetchFailure(error.to_string()))?;
        let Some(content) = content else {
            debug!(%date, "No content published");
            return Ok(None);
        };

        let entry = self
            .content
            .entry_for(content, self.scheduler.next_local_midnight());
        Ok(Some(self.content.put(entry).await?))
    }

    fn record_outcome(&self, elapsed: Duration, success: bool) {
        self.performance.record(elapsed, success);
        if success {
            self.health.outcomes().record_success();
        } else {
            self.health.outcomes().record_failure();
        }
    }

    async fn fetch_or_fallback(self: &Arc<Self>) -> Option<ServedContent> {
        let status = self.connectivity_status().await;
        if status == ConnectivityStatus::Offline {
            self.queue_refresh().await;
            self.emit(ContentEvent::FetchFailed {
                message: "offline".to_string(),
                offline: true,
            });
        } else {
            match self.refresh_from_remote().await {
                Ok(Some(entry)) => return Some(ServedContent::new(entry, ContentSource::Network)),
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "Content fetch failed, serving cache");
                    self.emit(ContentEvent::FetchFailed {
                        message: error.to_string(),
                        offline: false,
                    });
                }
            }
        }
        self.serve_cached().await
    }

    /// Best cached answer, without touching the network.
    async fn serve_cached(&self) -> Option<ServedContent> {
        if let Some(entry) = self.content.get(false).await {
            return Some(ServedContent::new(entry, ContentSource::Cache));
        }
        if let Some(entry) = self.content.get(true).await {
            self.emit(ContentEvent::ServedStale {
                content_id: entry.content_id().to_string(),
            });
            return Some(ServedContent::new(entry, ContentSource::Stale));
        }
        let (entry, source) = match self.content.last_known().await {
            Some(entry) => (entry, ContentSource::LastKnown),
            None => (
                self.content.history(u32::MAX).await.next()?,
                ContentSource::History,
            ),
        };
        self.emit(ContentEvent::ServedFallback {
            content_id: entry.content_id().to_string(),
        });
        Some(ServedContent::new(entry, source))
    }

    async fn queue_refresh(&self) {
        let kind = ActionKind::ContentRefresh {
            date: self.local_today(),
        };
        if let Err(error) = self.queue.enqueue(kind).await {
            warn!(error = %error, "Failed to queue content refresh");
        }
    }

    /// Refresh in the background unless a revalidation is already running.
    fn spawn_revalidation(self: &Arc<Self>) {
        if self.revalidating.swap(true, Ordering::SeqCst) {
            debug!("Revalidation already in progress");
            return;
        }
        let inner = Arc::clone(self);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = inner.refresh_from_remote() => {
                    if let Err(error) = result {
                        warn!(error = %error, "Background revalidation failed");
                    }
                }
            }
            inner.revalidating.store(false, Ordering::SeqCst);
        });
    }

    async fn drain_cycle(self: &Arc<Self>) -> DrainReport {
        let report = self.queue.drain(self.engine_syncer()).await;
        if report.failed > 0 {
            self.schedule_retry();
        }
        report
    }

    /// Retry failed drains with the queue's backoff until the queue is clean,
    /// the device goes offline, or the engine is disposed.
    fn schedule_retry(self: &Arc<Self>) {
        if self.is_disposed() || self.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                let Some(delay) = weak.upgrade().map(|inner| inner.queue.next_retry_delay()) else {
                    return;
                };
                debug!(delay_ms = delay.as_millis() as u64, "Drain retry scheduled");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.connectivity_status().await == ConnectivityStatus::Offline {
                    break;
                }
                let report = inner.queue.drain(inner.engine_syncer()).await;
                if report.failed == 0 {
                    break;
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.retry_scheduled.store(false, Ordering::SeqCst);
            }
        });
    }

    async fn subscribe_connectivity(self: &Arc<Self>) -> core_cache::Result<()> {
        if self.connectivity_subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut stream = match self.connectivity.subscribe_changes().await {
            Ok(stream) => stream,
            Err(error) => {
                self.connectivity_subscribed.store(false, Ordering::SeqCst);
                return Err(error.into());
            }
        };

        let weak = Arc::downgrade(self);
        let token = self.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                let status = tokio::select! {
                    _ = token.cancelled() => break,
                    status = stream.next() => status,
                };
                let Some(status) = status else {
                    break;
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!(?status, "Connectivity changed");
                if status == ConnectivityStatus::Online {
                    inner.on_reconnected().await;
                }
            }
            debug!("Connectivity listener stopped");
        });
        Ok(())
    }

    async fn on_reconnected(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let report = self.drain_cycle().await;
        info!(
            synced = report.synced,
            failed = report.failed,
            pending = report.pending,
            "Back online, queue drained"
        );

        if self.content.get(false).await.is_none() {
            if let Err(error) = self.refresh_from_remote().await {
                warn!(error = %error, "Refresh after reconnect failed");
            }
        }
    }

    async fn arm_refresh_timer(self: &Arc<Self>) -> core_cache::Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let callback: core_cache::DueCallback = Arc::new(move |fired_at| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.on_refresh_due(fired_at).await;
                }
            }
            .boxed()
        });
        self.scheduler.schedule_next_refresh(callback).await?;
        Ok(())
    }

    async fn on_refresh_due(&self, fired_at: DateTime<Utc>) {
        if self.is_disposed() {
            return;
        }
        info!(%fired_at, "Midnight refresh");
        if self.connectivity_status().await == ConnectivityStatus::Offline {
            self.queue_refresh().await;
            return;
        }
        if let Err(error) = self.refresh_from_remote().await {
            warn!(error = %error, "Midnight refresh failed, queueing");
            self.queue_refresh().await;
        }
    }

    async fn arm_background_timers(self: &Arc<Self>) {
        if self.timers_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let features = self.settings.features;

        // Detached; stopped through the shutdown token
        let _ = self.scheduler.start_timezone_watch().await;

        if features.enable_periodic_maintenance {
            let _ = Arc::clone(&self.maintenance).spawn_periodic(
                self.settings.maintenance.cleanup_interval(),
                self.shutdown.child_token(),
            );
        }

        if features.enable_periodic_metrics {
            let weak = Arc::downgrade(self);
            let token = self.shutdown.child_token();
            let interval = self.settings.metrics.collection_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            inner.collect_metrics().await;
                        }
                    }
                }
                debug!("Periodic metrics stopped");
            });
        }
    }

    async fn collect_metrics(&self) -> MetricsReport {
        let report = self.metrics.collect().await;
        if self.is_disposed() {
            return report;
        }
        if let Some(metrics) = report.migration_metrics() {
            match self.migration.evaluate_automatic_rollback(&metrics).await {
                Ok(Some(record)) => warn!(
                    reason = %record.reason,
                    level = %record.level,
                    "Automatic rollback triggered"
                ),
                Ok(None) => {}
                Err(error) => warn!(error = %error, "Automatic rollback evaluation failed"),
            }
        }
        report
    }

    /// Fetch if the current entry is not fresh. Returns the number of entries
    /// refreshed.
    async fn warm(&self) -> core_cache::Result<usize> {
        if self.content.get(false).await.is_some() {
            return Ok(0);
        }
        if self.connectivity_status().await == ConnectivityStatus::Offline {
            return Ok(0);
        }
        Ok(self.refresh_from_remote().await?.map_or(0, |_| 1))
    }
}

/// Delivers queued actions. Content refreshes are handled by the engine
/// itself; everything else goes to the host syncer.
struct EngineSyncer {
    inner: Arc<CoordinatorInner>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ActionSyncer for EngineSyncer {
    async fn sync(&self, action: &PendingAction) -> core_cache::Result<()> {
        match &action.kind {
            ActionKind::ContentRefresh { date } => {
                if *date != self.inner.local_today() {
                    debug!(%date, "Skipping refresh for a past date");
                    return Ok(());
                }
                if self.inner.content.get(false).await.is_some() {
                    return Ok(());
                }
                self.inner.refresh_from_remote().await.map(|_| ())
            }
            _ => {
                let started = Instant::now();
                let result = self.inner.syncer.sync(action).await;
                self.inner.record_outcome(started.elapsed(), result.is_ok());
                result
            }
        }
    }
}

/// Strategy seam over the coordinator's components.
struct EngineTarget {
    inner: Arc<CoordinatorInner>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationTarget for EngineTarget {
    async fn restore_state(&self) -> core_strategy::Result<()> {
        let inner = &self.inner;
        let step = |error: CacheError| StrategyError::step("restore_state", error);
        inner.content.load().await.map_err(step)?;
        inner.queue.load().await.map_err(step)?;
        inner.scheduler.load().await.map_err(step)?;
        inner
            .migration
            .load()
            .await
            .map_err(|error| StrategyError::step("restore_state", error))?;
        Ok(())
    }

    async fn check_integrity(&self) -> core_strategy::Result<bool> {
        Ok(self.inner.health.integrity_check().await.passed)
    }

    async fn repair(&self) -> core_strategy::Result<usize> {
        self.inner
            .health
            .repair()
            .await
            .map_err(|error| StrategyError::step("repair", error))
    }

    async fn subscribe_connectivity(&self) -> core_strategy::Result<()> {
        self.inner
            .subscribe_connectivity()
            .await
            .map_err(|error| StrategyError::step("subscribe_connectivity", error))
    }

    async fn arm_refresh_timer(&self) -> core_strategy::Result<()> {
        self.inner
            .arm_refresh_timer()
            .await
            .map_err(|error| StrategyError::step("arm_refresh_timer", error))
    }

    async fn arm_background_timers(&self) -> core_strategy::Result<()> {
        self.inner.arm_background_timers().await;
        Ok(())
    }

    async fn warm_content(&self) -> core_strategy::Result<()> {
        if !self.inner.settings.features.enable_warmup_fetch {
            return Ok(());
        }
        self.inner
            .warm()
            .await
            .map(|_| ())
            .map_err(|error| StrategyError::step("warm_content", error))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl OptimizationTarget for EngineTarget {
    async fn trim_history(&self, keep: usize) -> core_strategy::Result<(usize, u64)> {
        self.inner
            .content
            .trim_history(keep)
            .await
            .map_err(|error| StrategyError::step("trim_history", error))
    }

    async fn prune_queue(&self) -> core_strategy::Result<(usize, u64)> {
        let max_age = self.inner.settings.queue.max_action_age();
        self.inner
            .queue
            .remove_older_than(max_age)
            .await
            .map_err(|error| StrategyError::step("prune_queue", error))
    }

    async fn purge_expired(&self) -> core_strategy::Result<(usize, u64)> {
        let now = self.inner.clock.now();
        self.inner
            .content
            .prune_history(now)
            .await
            .map_err(|error| StrategyError::step("purge_expired", error))
    }

    fn average_response_ms(&self) -> Option<f64> {
        let stats = self.inner.performance.stats();
        (stats.samples > 0).then_some(stats.avg_response_ms)
    }

    async fn warm_cache(&self) -> core_strategy::Result<usize> {
        self.inner
            .warm()
            .await
            .map_err(|error| StrategyError::step("warm_cache", error))
    }
}
