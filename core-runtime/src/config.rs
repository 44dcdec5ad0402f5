//! # Engine Configuration Module
//!
//! Provides configuration management for the daily content cache engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! [`EngineSettings`] instance holding every tunable of the engine: cache
//! freshness, offline queue bounds and retry backoff, scheduler intervals,
//! maintenance cadence, metrics collection and migration thresholds. The
//! builder validates the result so misconfiguration fails fast with an
//! actionable message.
//!
//! Every section is deserializable with per-field defaults, so remote
//! configuration can supply a partial document.
//!
//! ## Usage
//!
//! ### Defaults
//!
//! ```
//! use core_runtime::config::EngineSettings;
//!
//! let settings = EngineSettings::builder().build().unwrap();
//! assert_eq!(settings.queue.max_pending, 100);
//! ```
//!
//! ### Custom Settings
//!
//! ```
//! use core_runtime::config::{EngineSettings, MigrationThresholds};
//!
//! let settings = EngineSettings::builder()
//!     .max_pending_actions(50)
//!     .max_retries(5)
//!     .timezone_check_interval_ms(60_000)
//!     .migration_thresholds(MigrationThresholds {
//!         max_error_rate: 0.02,
//!         ..Default::default()
//!     })
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::EngineSettings;
//!
//! // A queue that cannot hold a single action is rejected
//! let settings = EngineSettings::builder()
//!     .max_pending_actions(0)
//!     .build()
//!     .expect("Should fail - zero queue capacity");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration.
///
/// Use [`EngineSettingsBuilder`] to construct validated instances.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cache: CacheSettings,
    pub queue: QueueSettings,
    pub scheduler: SchedulerSettings,
    pub maintenance: MaintenanceSettings,
    pub health: HealthSettings,
    pub metrics: MetricsSettings,
    pub initialization: InitializationSettings,
    pub migration: MigrationSettings,
    pub features: FeatureFlags,
    /// Running under a test harness: no network, no timers during init
    pub test_mode: bool,
}

/// Content freshness and history bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Upper bound on freshness; entries also expire at the next local midnight
    pub fresh_ttl_secs: u64,
    /// How long past `expires_at` an entry may still be served as stale
    pub stale_grace_secs: u64,
    /// Maximum number of days kept in history
    pub max_history_days: usize,
    /// History entries whose soft expiry is older than this are cleaned up
    pub history_retention_days: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            fresh_ttl_secs: 24 * 60 * 60,
            stale_grace_secs: 24 * 60 * 60,
            max_history_days: 30,
            history_retention_days: 7,
        }
    }
}

impl CacheSettings {
    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.fresh_ttl_secs)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.history_retention_days) * 24 * 60 * 60)
    }
}

/// Bounded exponential backoff applied between queue drain cycles.
///
/// The delay after `n` consecutive failing cycles is
/// `min(base_delay * multiplier^(n - 1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 5 * 60 * 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next drain after `consecutive_failures` failing cycles.
    ///
    /// Zero failures means no delay.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(32) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Offline queue bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Capacity; the oldest action is evicted on overflow
    pub max_pending: usize,
    /// Failed attempts tolerated before an action is dropped
    pub max_retries: u32,
    /// Actions older than this are removed by maintenance
    pub max_action_age_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_pending: 100,
            max_retries: 3,
            max_action_age_secs: 7 * 24 * 60 * 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueSettings {
    pub fn max_action_age(&self) -> Duration {
        Duration::from_secs(self.max_action_age_secs)
    }
}

/// Refresh scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// How often the local UTC offset is re-derived
    pub timezone_check_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone_check_interval_ms: 5 * 60 * 1_000,
        }
    }
}

impl SchedulerSettings {
    pub fn timezone_check_interval(&self) -> Duration {
        Duration::from_millis(self.timezone_check_interval_ms)
    }
}

/// Periodic maintenance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub cleanup_interval_secs: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 6 * 60 * 60,
        }
    }
}

impl MaintenanceSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Health scoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Number of recent sync/fetch outcomes used for the failure rate
    pub outcome_window: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { outcome_window: 20 }
    }
}

/// Metrics aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub collection_interval_secs: u64,
    /// Reports kept for trend analysis
    pub history_size: usize,
    /// Score delta below which the trend is reported as stable
    pub trend_tolerance: f64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            collection_interval_secs: 15 * 60,
            history_size: 10,
            trend_tolerance: 0.05,
        }
    }
}

impl MetricsSettings {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }
}

/// Initialization strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializationSettings {
    /// A previous initialization newer than this qualifies for warm restart
    pub warm_restart_window_secs: u64,
}

impl Default for InitializationSettings {
    fn default() -> Self {
        Self {
            warm_restart_window_secs: 60 * 60,
        }
    }
}

impl InitializationSettings {
    pub fn warm_restart_window(&self) -> Duration {
        Duration::from_secs(self.warm_restart_window_secs)
    }
}

/// Success criteria and automated rollback thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationThresholds {
    /// Highest acceptable error rate (0.0 - 1.0)
    pub max_error_rate: f64,
    /// Highest acceptable average response time
    pub max_response_time_ms: u64,
    /// Lowest acceptable health score (0.0 - 1.0)
    pub min_health_score: f64,
    /// Consecutive error-rate breaches before an automatic rollback
    pub consecutive_breaches_required: u32,
    /// Samples a metrics window needs before it can trigger a rollback
    pub min_sample_size: u64,
}

impl Default for MigrationThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.05,
            max_response_time_ms: 2_000,
            min_health_score: 0.7,
            consecutive_breaches_required: 1,
            min_sample_size: 20,
        }
    }
}

/// Migration controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub thresholds: MigrationThresholds,
    /// Identifiers that receive the modern path during internal testing
    pub internal_identifiers: Vec<String>,
    /// Development build: enables the `DevOnly` rollout strategy
    pub dev_mode: bool,
    /// Evaluate automatic rollback after each metrics collection
    pub auto_rollback_enabled: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            thresholds: MigrationThresholds::default(),
            internal_identifiers: Vec::new(),
            dev_mode: false,
            auto_rollback_enabled: true,
        }
    }
}

/// Feature flags control optional engine behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Serve stale content immediately and refresh in the background
    pub enable_background_revalidation: bool,

    /// Run selective cleanup on a timer
    pub enable_periodic_maintenance: bool,

    /// Collect metrics reports on a timer
    pub enable_periodic_metrics: bool,

    /// Fetch today's content eagerly during cold start
    pub enable_warmup_fetch: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_revalidation: true,
            enable_periodic_maintenance: true,
            enable_periodic_metrics: false,
            enable_warmup_fetch: true,
        }
    }
}

impl EngineSettings {
    /// Creates a new builder for constructing `EngineSettings`.
    pub fn builder() -> EngineSettingsBuilder {
        EngineSettingsBuilder::default()
    }

    /// Settings for test harnesses: short intervals, no timers at init.
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerSettings {
                timezone_check_interval_ms: 50,
            },
            maintenance: MaintenanceSettings {
                cleanup_interval_secs: 1,
            },
            metrics: MetricsSettings {
                collection_interval_secs: 1,
                ..Default::default()
            },
            queue: QueueSettings {
                retry: RetryPolicy {
                    base_delay_ms: 10,
                    max_delay_ms: 100,
                    multiplier: 2.0,
                },
                ..Default::default()
            },
            features: FeatureFlags {
                enable_periodic_maintenance: false,
                enable_periodic_metrics: false,
                ..Default::default()
            },
            test_mode: true,
            ..Default::default()
        }
    }

    /// Validates the settings and returns an error if invalid.
    ///
    /// This checks:
    /// - Queue capacity and retry bounds are usable
    /// - Retry backoff is bounded and non-decreasing
    /// - Intervals are non-zero
    /// - Thresholds are within their ranges
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_pending == 0 {
            return Err(Error::Config(
                "Queue capacity must be greater than 0 actions".to_string(),
            ));
        }

        if self.queue.max_pending > 10_000 {
            return Err(Error::Config(
                "Queue capacity exceeds maximum of 10,000 actions".to_string(),
            ));
        }

        let retry = &self.queue.retry;
        if retry.base_delay_ms == 0 || retry.max_delay_ms < retry.base_delay_ms {
            return Err(Error::Config(
                "Retry backoff must have 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }

        if retry.multiplier < 1.0 {
            return Err(Error::Config(
                "Retry backoff multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.cache.fresh_ttl_secs == 0 {
            return Err(Error::Config(
                "Content freshness TTL must be greater than 0 seconds".to_string(),
            ));
        }

        if self.scheduler.timezone_check_interval_ms == 0 {
            return Err(Error::Config(
                "Timezone check interval must be greater than 0ms".to_string(),
            ));
        }

        if self.maintenance.cleanup_interval_secs == 0
            || self.metrics.collection_interval_secs == 0
        {
            return Err(Error::Config(
                "Maintenance and metrics intervals must be greater than 0 seconds".to_string(),
            ));
        }

        if self.health.outcome_window == 0 || self.metrics.history_size == 0 {
            return Err(Error::Config(
                "Health outcome window and metrics history must hold at least one sample"
                    .to_string(),
            ));
        }

        let thresholds = &self.migration.thresholds;
        if !(0.0..=1.0).contains(&thresholds.max_error_rate) {
            return Err(Error::Config(
                "Migration max_error_rate must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&thresholds.min_health_score) {
            return Err(Error::Config(
                "Migration min_health_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if thresholds.consecutive_breaches_required == 0 {
            return Err(Error::Config(
                "Migration consecutive_breaches_required must be at least 1".to_string(),
            ));
        }

        if thresholds.min_sample_size == 0 {
            return Err(Error::Config(
                "Migration min_sample_size must be at least 1 sample".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse settings from a JSON document and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid settings document: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Builder for constructing [`EngineSettings`] instances.
///
/// Starts from [`EngineSettings::default`]; call
/// [`build()`](EngineSettingsBuilder::build) to validate.
#[derive(Debug, Default)]
pub struct EngineSettingsBuilder {
    settings: EngineSettings,
}

impl EngineSettingsBuilder {
    /// Start from an existing settings value, e.g. [`EngineSettings::for_testing`].
    pub fn from_settings(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn cache(mut self, cache: CacheSettings) -> Self {
        self.settings.cache = cache;
        self
    }

    pub fn fresh_ttl_secs(mut self, secs: u64) -> Self {
        self.settings.cache.fresh_ttl_secs = secs;
        self
    }

    pub fn stale_grace_secs(mut self, secs: u64) -> Self {
        self.settings.cache.stale_grace_secs = secs;
        self
    }

    pub fn max_history_days(mut self, days: usize) -> Self {
        self.settings.cache.max_history_days = days;
        self
    }

    /// Sets the offline queue capacity.
    ///
    /// Default: 100 actions
    pub fn max_pending_actions(mut self, max: usize) -> Self {
        self.settings.queue.max_pending = max;
        self
    }

    /// Sets the retry budget of each queued action.
    ///
    /// Default: 3 retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.settings.queue.max_retries = retries;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.settings.queue.retry = policy;
        self
    }

    pub fn timezone_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.settings.scheduler.timezone_check_interval_ms = interval_ms;
        self
    }

    pub fn cleanup_interval_secs(mut self, secs: u64) -> Self {
        self.settings.maintenance.cleanup_interval_secs = secs;
        self
    }

    pub fn metrics(mut self, metrics: MetricsSettings) -> Self {
        self.settings.metrics = metrics;
        self
    }

    pub fn warm_restart_window_secs(mut self, secs: u64) -> Self {
        self.settings.initialization.warm_restart_window_secs = secs;
        self
    }

    pub fn migration_thresholds(mut self, thresholds: MigrationThresholds) -> Self {
        self.settings.migration.thresholds = thresholds;
        self
    }

    pub fn internal_identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.migration.internal_identifiers = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.settings.migration.dev_mode = enabled;
        self
    }

    pub fn auto_rollback(mut self, enabled: bool) -> Self {
        self.settings.migration.auto_rollback_enabled = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.settings.features = features;
        self
    }

    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.settings.test_mode = enabled;
        self
    }

    /// Builds and validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn build(self) -> Result<EngineSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::builder().build().unwrap();
        assert_eq!(settings.queue.max_pending, 100);
        assert_eq!(settings.queue.max_retries, 3);
        assert_eq!(settings.migration.thresholds.max_error_rate, 0.05);
        assert_eq!(settings.migration.thresholds.consecutive_breaches_required, 1);
        assert_eq!(settings.migration.thresholds.min_sample_size, 20);
        assert!(!settings.test_mode);
    }

    #[test]
    fn test_testing_preset_is_valid() {
        let settings = EngineSettings::for_testing();
        settings.validate().unwrap();
        assert!(settings.test_mode);
        assert!(
            settings.scheduler.timezone_check_interval()
                < EngineSettings::default().scheduler.timezone_check_interval()
        );
    }

    #[test]
    fn test_builder_overrides() {
        let settings = EngineSettings::builder()
            .max_pending_actions(10)
            .max_retries(7)
            .internal_identifiers(["qa-1", "qa-2"])
            .build()
            .unwrap();

        assert_eq!(settings.queue.max_pending, 10);
        assert_eq!(settings.queue.max_retries, 7);
        assert_eq!(settings.migration.internal_identifiers, vec!["qa-1", "qa-2"]);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let result = EngineSettings::builder().max_pending_actions(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let result = EngineSettings::builder()
            .retry_policy(RetryPolicy {
                base_delay_ms: 1_000,
                max_delay_ms: 10,
                multiplier: 2.0,
            })
            .build();
        assert!(result.unwrap_err().to_string().contains("base_delay_ms"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_error_rate() {
        let result = EngineSettings::builder()
            .migration_thresholds(MigrationThresholds {
                max_error_rate: 1.5,
                ..Default::default()
            })
            .build();
        assert!(result.unwrap_err().to_string().contains("max_error_rate"));
    }

    #[test]
    fn test_validate_rejects_zero_sample_size() {
        let result = EngineSettings::builder()
            .migration_thresholds(MigrationThresholds {
                min_sample_size: 0,
                ..Default::default()
            })
            .build();
        assert!(result.unwrap_err().to_string().contains("min_sample_size"));
    }

    #[test]
    fn test_retry_policy_is_bounded_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(40), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings =
            EngineSettings::from_json(r#"{ "queue": { "max_pending": 25 }, "test_mode": true }"#)
                .unwrap();

        assert_eq!(settings.queue.max_pending, 25);
        assert_eq!(settings.queue.max_retries, 3);
        assert!(settings.test_mode);
        assert_eq!(settings.cache, CacheSettings::default());
    }

    #[test]
    fn test_json_validation_applies() {
        let result = EngineSettings::from_json(r#"{ "queue": { "max_pending": 0 } }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
