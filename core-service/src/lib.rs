//! Cache coordinator façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (content backend,
//! connectivity, key-value storage, clock, timezone) into the cache engine.
//! Desktop apps typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and call [`desktop_dependencies`]; other hosts build an
//! [`EngineDependencies`] bundle from their own adapters.
//!
//! ```ignore
//! use core_runtime::config::EngineSettings;
//! use core_service::{CacheCoordinator, EngineDependencies};
//!
//! let deps = EngineDependencies::builder()
//!     .content_provider(provider)
//!     .connectivity(monitor)
//!     .store(store)
//!     .timezone(timezone)
//!     .action_syncer(syncer)
//!     .subject_id("user-42")
//!     .build()?;
//! let engine = CacheCoordinator::new(deps, EngineSettings::default())?;
//! let today = engine.get_today_content(false).await;
//! ```

pub mod coordinator;
pub mod error;
pub mod legacy;
pub mod metrics;

pub use coordinator::{
    ActionReceipt, ActionStatus, CacheCoordinator, ContentSource, HealthReport,
    InitializationRecord, ServedContent,
};
pub use error::{EngineError, Result};
pub use legacy::LegacyCacheAdapter;
pub use metrics::{
    CollectionError, ComponentScore, Grade, MetricCategory, MetricsAggregator, MetricsReport,
    PerformanceStats, PerformanceTracker, SchedulerMetrics, Trend,
};

use std::sync::Arc;

use bridge_traits::{
    background::LifecycleObserver,
    content::ContentProvider,
    network::ConnectivityMonitor,
    storage::KeyValueStore,
    time::{Clock, SystemClock, TimezoneProvider},
};
use core_cache::ActionSyncer;
use core_runtime::events::EventBus;

/// Aggregated handle to all bridge dependencies the engine requires.
pub struct EngineDependencies {
    pub content_provider: Arc<dyn ContentProvider>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub store: Arc<dyn KeyValueStore>,
    pub timezone: Arc<dyn TimezoneProvider>,
    pub action_syncer: Arc<dyn ActionSyncer>,
    pub clock: Arc<dyn Clock>,
    /// Foreground/background state; absent hosts are treated as foreground
    pub lifecycle: Option<Arc<dyn LifecycleObserver>>,
    /// Shared bus; a private one is created when absent
    pub event_bus: Option<EventBus>,
    /// Stable identifier used for rollout bucketing
    pub subject_id: String,
}

impl EngineDependencies {
    pub fn builder() -> EngineDependenciesBuilder {
        EngineDependenciesBuilder::default()
    }
}

#[derive(Default)]
pub struct EngineDependenciesBuilder {
    content_provider: Option<Arc<dyn ContentProvider>>,
    connectivity: Option<Arc<dyn ConnectivityMonitor>>,
    store: Option<Arc<dyn KeyValueStore>>,
    timezone: Option<Arc<dyn TimezoneProvider>>,
    action_syncer: Option<Arc<dyn ActionSyncer>>,
    clock: Option<Arc<dyn Clock>>,
    lifecycle: Option<Arc<dyn LifecycleObserver>>,
    event_bus: Option<EventBus>,
    subject_id: Option<String>,
}

impl EngineDependenciesBuilder {
    pub fn content_provider(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.content_provider = Some(provider);
        self
    }

    pub fn connectivity(mut self, monitor: Arc<dyn ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn timezone(mut self, timezone: Arc<dyn TimezoneProvider>) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn action_syncer(mut self, syncer: Arc<dyn ActionSyncer>) -> Self {
        self.action_syncer = Some(syncer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lifecycle(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle = Some(observer);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Build the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CapabilityMissing`] when a required bridge was
    /// not provided. The clock defaults to [`SystemClock`] and the subject
    /// identifier to `"anonymous"`.
    pub fn build(self) -> Result<EngineDependencies> {
        Ok(EngineDependencies {
            content_provider: self.content_provider.ok_or_else(|| {
                missing(
                    "ContentProvider",
                    "ContentProvider implementation is required to fetch today's content. \
                     Desktop: enable the 'desktop-shims' feature to use ReqwestContentProvider.",
                )
            })?,
            connectivity: self.connectivity.ok_or_else(|| {
                missing(
                    "ConnectivityMonitor",
                    "ConnectivityMonitor implementation is required for offline handling. \
                     Desktop: use DesktopConnectivityMonitor. \
                     Mobile: forward OS reachability callbacks to a ManualConnectivityMonitor.",
                )
            })?,
            store: self.store.ok_or_else(|| {
                missing(
                    "KeyValueStore",
                    "KeyValueStore implementation is required for cache persistence. \
                     Desktop: use SqliteKeyValueStore. \
                     Tests: use MemoryKeyValueStore.",
                )
            })?,
            timezone: self.timezone.ok_or_else(|| {
                missing(
                    "TimezoneProvider",
                    "TimezoneProvider implementation is required to schedule the midnight refresh. \
                     Desktop: use SystemTimezone or NamedTimezone.",
                )
            })?,
            action_syncer: self.action_syncer.ok_or_else(|| {
                missing(
                    "ActionSyncer",
                    "ActionSyncer implementation is required to deliver queued user actions.",
                )
            })?,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lifecycle: self.lifecycle,
            event_bus: self.event_bus,
            subject_id: self.subject_id.unwrap_or_else(|| "anonymous".to_string()),
        })
    }
}

fn missing(capability: &str, message: &str) -> EngineError {
    EngineError::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

/// Default desktop bundle: SQLite storage in the platform data directory,
/// HTTP content backend, TCP reachability connectivity and the OS timezone.
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub async fn desktop_dependencies(
    base_url: &str,
    action_syncer: Arc<dyn ActionSyncer>,
    subject_id: impl Into<String>,
) -> Result<EngineDependencies> {
    use bridge_desktop::{
        DesktopConnectivityMonitor, DesktopLifecycleObserver, ReqwestContentProvider,
        SqliteKeyValueStore, SystemTimezone,
    };

    let store = SqliteKeyValueStore::default_location()
        .await
        .map_err(|err| EngineError::InitializationFailed(err.to_string()))?;
    let provider = ReqwestContentProvider::new(base_url)
        .map_err(|err| EngineError::InitializationFailed(err.to_string()))?;

    EngineDependencies::builder()
        .content_provider(Arc::new(provider))
        .connectivity(Arc::new(DesktopConnectivityMonitor::new()))
        .store(Arc::new(store))
        .timezone(Arc::new(SystemTimezone::new()))
        .lifecycle(Arc::new(DesktopLifecycleObserver::new()))
        .action_syncer(action_syncer)
        .subject_id(subject_id)
        .build()
}
