use async_trait::async_trait;
use bridge_desktop::{ManualConnectivityMonitor, MemoryKeyValueStore};
use bridge_traits::content::{Content, ContentPayload, ContentProvider};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::ConnectivityStatus;
use bridge_traits::time::{FixedTimezone, ManualClock};
use bridge_traits::BridgeError;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use core_cache::{ActionKind, ActionSyncer, PendingAction};
use core_migration::{MigrationMetrics, MigrationPhase, RollbackLevel, RolloutStrategy};
use core_runtime::config::{EngineSettings, FeatureFlags};
use core_runtime::events::{ContentEvent, EngineEvent};
use core_service::{
    ActionStatus, CacheCoordinator, ContentSource, EngineDependencies, LegacyCacheAdapter,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct ScriptedProvider {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn fetch(&self, date: NaiveDate) -> BridgeResult<Option<Content>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Remote("backend unavailable".to_string()));
        }
        Ok(Some(Content::new(
            format!("daily-{date}"),
            date,
            ContentPayload {
                title: format!("Item for {date}"),
                summary: "Summary".to_string(),
                body: "Body".to_string(),
                topic: Some("focus".to_string()),
                reading_minutes: Some(4),
            },
        )))
    }
}

#[derive(Default)]
struct RecordingSyncer {
    topics: Mutex<Vec<String>>,
}

impl RecordingSyncer {
    fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionSyncer for RecordingSyncer {
    async fn sync(&self, action: &PendingAction) -> core_cache::Result<()> {
        if let ActionKind::GenericSync { topic, .. } = &action.kind {
            self.topics.lock().unwrap().push(topic.clone());
        }
        Ok(())
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    monitor: Arc<ManualConnectivityMonitor>,
    provider: Arc<ScriptedProvider>,
    syncer: Arc<RecordingSyncer>,
    engine: CacheCoordinator,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn harness(settings: EngineSettings, status: ConnectivityStatus) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let monitor = Arc::new(ManualConnectivityMonitor::new(status));
    let provider = Arc::new(ScriptedProvider::new());
    let syncer = Arc::new(RecordingSyncer::default());

    let deps = EngineDependencies::builder()
        .content_provider(provider.clone())
        .connectivity(monitor.clone())
        .store(Arc::new(MemoryKeyValueStore::new()))
        .timezone(Arc::new(FixedTimezone::utc()))
        .action_syncer(syncer.clone())
        .clock(clock.clone())
        .subject_id("user-42")
        .build()
        .unwrap();

    Harness {
        clock,
        monitor,
        provider,
        syncer,
        engine: CacheCoordinator::new(deps, settings).unwrap(),
    }
}

/// Full initialization path without periodic timers or a warm-up fetch.
fn live_settings() -> EngineSettings {
    EngineSettings {
        test_mode: false,
        features: FeatureFlags {
            enable_warmup_fetch: false,
            enable_periodic_maintenance: false,
            enable_periodic_metrics: false,
            ..Default::default()
        },
        ..EngineSettings::for_testing()
    }
}

fn healthy() -> MigrationMetrics {
    MigrationMetrics {
        error_rate: 0.01,
        avg_response_time_ms: 120.0,
        health_score: 0.95,
        sample_size: 500,
    }
}

fn generic(topic: &str) -> ActionKind {
    ActionKind::GenericSync {
        topic: topic.to_string(),
        fields: BTreeMap::new(),
    }
}

async fn advance_to(engine: &CacheCoordinator, phase: MigrationPhase) {
    while engine.migration().state().await.phase < phase {
        engine.migration().advance_phase(&healthy()).await.unwrap();
    }
}

#[tokio::test]
async fn offline_actions_drain_in_order_after_reconnect() {
    let h = harness(live_settings(), ConnectivityStatus::Offline);
    h.engine.initialize().await.unwrap();

    for topic in ["like", "bookmark", "share"] {
        let receipt = h.engine.record_offline_action(generic(topic)).await;
        assert!(matches!(receipt.status, ActionStatus::Queued { .. }));
    }
    assert_eq!(h.engine.pending_actions().await.len(), 3);

    h.monitor.set_status(ConnectivityStatus::Online);

    for _ in 0..200 {
        if h.engine.pending_actions().await.is_empty() && h.engine.peek_cached(false).await.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(h.syncer.topics(), vec!["like", "bookmark", "share"]);
    assert!(h.engine.pending_actions().await.is_empty());
    assert!(h.engine.peek_cached(false).await.is_some());

    h.engine.dispose().await;
}

#[tokio::test]
async fn cold_offline_launch_returns_nothing_and_queues_refresh() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Offline);

    assert!(h.engine.get_today_content(false).await.is_none());
    assert!(h.engine.get_today_content(false).await.is_none());

    let pending = h.engine.pending_actions().await;
    assert_eq!(pending.len(), 1, "refresh requests are coalesced");
    assert_eq!(
        pending[0].kind,
        ActionKind::ContentRefresh {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        }
    );
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn expired_entry_is_served_stale_when_fetch_fails() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);

    let fresh = h.engine.get_today_content(false).await.unwrap();
    assert_eq!(fresh.source, ContentSource::Network);

    // Past local midnight, inside the grace window
    h.clock.advance(Duration::hours(17));
    h.provider.set_failing(true);

    let served = h.engine.get_today_content(false).await.unwrap();
    assert_eq!(served.source, ContentSource::Stale);
    assert!(served.is_stale);
    assert!(!served.is_fallback);
    assert_eq!(served.content().content_id, fresh.content().content_id);
}

#[tokio::test]
async fn modern_path_serves_stale_and_revalidates_in_background() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);
    h.engine.initialize().await.unwrap();
    advance_to(&h.engine, MigrationPhase::FullDeployment).await;

    h.engine.get_today_content(false).await.unwrap();
    h.clock.advance(Duration::hours(17));

    let served = h.engine.get_today_content(false).await.unwrap();
    assert_eq!(served.source, ContentSource::Stale);
    assert_eq!(served.entry.date(), NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

    let mut refreshed = None;
    for _ in 0..200 {
        refreshed = h.engine.peek_cached(false).await;
        if refreshed.is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let refreshed = refreshed.expect("background revalidation stored fresh content");
    assert_eq!(refreshed.date(), NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
}

#[tokio::test]
async fn invalidation_keeps_a_stale_fallback() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);
    h.engine.get_today_content(false).await.unwrap();

    let outcome = h.engine.invalidate_cache("editorial correction").await.unwrap();
    assert!(outcome.version_bumped);
    assert!(h.engine.peek_cached(false).await.is_none());
    assert!(h.engine.peek_cached(true).await.is_some());

    h.monitor.set_status(ConnectivityStatus::Offline);
    let served = h.engine.get_today_content(false).await.unwrap();
    assert_eq!(served.source, ContentSource::Stale);
}

#[tokio::test]
async fn error_rate_breach_rolls_back_to_compatibility() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);
    h.engine.initialize().await.unwrap();
    advance_to(&h.engine, MigrationPhase::GradualRollout).await;
    h.engine
        .migration()
        .set_rollout(RolloutStrategy::AllUsers, 100)
        .await
        .unwrap();

    h.provider.set_failing(true);
    assert!(h.engine.get_today_content(true).await.is_none());

    // One failed fetch is not a sustained error rate
    h.engine.get_metrics_report().await;
    assert_eq!(
        h.engine.migration().state().await.phase,
        MigrationPhase::GradualRollout
    );

    let min_samples = h.engine.settings().migration.thresholds.min_sample_size;
    for _ in 1..min_samples {
        assert!(h.engine.get_today_content(true).await.is_none());
    }

    let report = h.engine.get_metrics_report().await;
    let metrics = report.migration_metrics().unwrap();
    assert!(metrics.error_rate > 0.05);
    assert!(metrics.sample_size >= min_samples);

    let state = h.engine.migration().state().await;
    assert_eq!(state.phase, MigrationPhase::CompatibilityOnly);
    assert!(state.forced_compatibility);
    assert_eq!(state.rollback_level, RollbackLevel::FeatureFlag);

    let history = h.engine.migration().rollback_history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].automatic);
    assert_eq!(history[0].phase_before, MigrationPhase::GradualRollout);
}

#[tokio::test]
async fn refresh_emits_content_event() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);
    let mut events = h.engine.subscribe_events();

    h.engine.get_today_content(false).await.unwrap();

    let mut refreshed = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Content(ContentEvent::Refreshed { date, .. }) = event {
            assert_eq!(date, "2024-05-01");
            refreshed = true;
        }
    }
    assert!(refreshed);
}

#[tokio::test]
async fn health_report_reflects_backlog() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Offline);
    h.engine.record_offline_action(generic("like")).await;

    let report = h.engine.get_health_report().await;
    assert_eq!(report.queue.pending, 1);
    assert!(!report.content.has_current);
    assert!(report.integrity.passed);
    assert!(report.snapshot.score < 1.0);
}

#[tokio::test]
async fn legacy_adapter_delegates_to_coordinator() {
    let h = harness(EngineSettings::for_testing(), ConnectivityStatus::Online);
    let legacy = LegacyCacheAdapter::new(h.engine.clone());

    assert!(legacy.get_cached_content().await.is_none());
    assert!(legacy.is_content_stale().await);

    let content = legacy.fetch_today().await.unwrap();
    assert_eq!(content.content_id, "daily-2024-05-01");
    assert!(!legacy.is_content_stale().await);
    assert_eq!(legacy.get_cached_content().await.unwrap(), content);

    legacy.clear_cache().await.unwrap();
    assert!(legacy.is_content_stale().await);

    h.monitor.set_status(ConnectivityStatus::Offline);
    let receipt = legacy.queue_pending_interaction("daily-2024-05-01", "like").await;
    assert!(receipt.is_accepted());
    assert_eq!(h.engine.pending_actions().await.len(), 1);
}
