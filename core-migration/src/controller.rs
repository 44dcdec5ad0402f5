//! # Migration Controller
//!
//! Reads take a snapshot of the state under a read lock. Transitions hold the
//! write lock, persist the new state, and only then swap it in, so rollout
//! evaluation never observes a half-applied transition.

use bridge_traits::time::Clock;
use core_cache::persistence::{keys, PersistentStore};
use core_runtime::config::MigrationSettings;
use core_runtime::events::{EngineEvent, EventBus, MigrationEvent};
use core_runtime::logging::mask_identifier;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{MigrationError, Result};
use crate::models::{
    CriteriaReport, Criterion, CriterionResult, MigrationMetrics, MigrationPhase, MigrationState,
    RollbackLevel, RollbackMetadata, RollbackRecord, RolloutStrategy,
};
use crate::rollout;

/// Rollback records kept in the persisted log
pub const ROLLBACK_LOG_LIMIT: usize = 20;

pub struct MigrationController {
    persistence: PersistentStore,
    clock: Arc<dyn Clock>,
    settings: MigrationSettings,
    events: Option<EventBus>,
    state: RwLock<MigrationState>,
    rollback_log: RwLock<VecDeque<RollbackRecord>>,
    consecutive_breaches: AtomicU32,
}

impl MigrationController {
    pub fn new(persistence: PersistentStore, clock: Arc<dyn Clock>, settings: MigrationSettings) -> Self {
        let initial = MigrationState::initial(clock.now());
        Self {
            persistence,
            clock,
            settings,
            events: None,
            state: RwLock::new(initial),
            rollback_log: RwLock::new(VecDeque::new()),
            consecutive_breaches: AtomicU32::new(0),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Restore persisted state, defaulting when absent or corrupt.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<MigrationState> {
        let restored: Option<MigrationState> =
            self.persistence.load_optional(keys::MIGRATION_STATE).await?;
        let log: Vec<RollbackRecord> = self.persistence.load_or_default(keys::ROLLBACK_LOG).await?;

        let mut state = self.state.write().await;
        if let Some(restored) = restored {
            *state = restored;
        }
        *self.rollback_log.write().await = log.into_iter().collect();

        info!(
            phase = %state.phase,
            forced_compatibility = state.forced_compatibility,
            "Migration state restored"
        );
        Ok(state.clone())
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> MigrationState {
        self.state.read().await.clone()
    }

    /// Whether `subject_id` should be served by the modern implementation.
    pub async fn use_modern_path(&self, subject_id: &str) -> bool {
        let state = self.state.read().await;
        if state.forced_compatibility {
            return false;
        }

        let modern = match state.phase {
            MigrationPhase::CompatibilityOnly => false,
            MigrationPhase::InternalTesting => self.is_internal(subject_id),
            MigrationPhase::GradualRollout => match state.rollout_strategy {
                RolloutStrategy::AllUsers => true,
                RolloutStrategy::Percentage => {
                    rollout::in_percentage(subject_id, state.rollout_percentage)
                }
                RolloutStrategy::UserHashBucket => {
                    rollout::in_cohort(subject_id, state.rollout_percentage)
                }
                RolloutStrategy::InternalOnly => self.is_internal(subject_id),
                RolloutStrategy::DevOnly => self.settings.dev_mode,
            },
            MigrationPhase::FullDeployment | MigrationPhase::LegacyRemoval => true,
        };
        debug!(
            subject = %mask_identifier(subject_id),
            phase = ?state.phase,
            modern,
            "Rollout decision"
        );
        modern
    }

    fn is_internal(&self, subject_id: &str) -> bool {
        self.settings
            .internal_identifiers
            .iter()
            .any(|id| id == subject_id)
    }

    /// Check metrics against the configured thresholds.
    pub fn validate_success_criteria(&self, metrics: &MigrationMetrics) -> CriteriaReport {
        let thresholds = &self.settings.thresholds;
        let details = vec![
            CriterionResult {
                criterion: Criterion::ErrorRate,
                passed: metrics.error_rate <= thresholds.max_error_rate,
                observed: metrics.error_rate,
                threshold: thresholds.max_error_rate,
            },
            CriterionResult {
                criterion: Criterion::ResponseTime,
                passed: metrics.avg_response_time_ms <= thresholds.max_response_time_ms as f64,
                observed: metrics.avg_response_time_ms,
                threshold: thresholds.max_response_time_ms as f64,
            },
            CriterionResult {
                criterion: Criterion::HealthScore,
                passed: metrics.health_score >= thresholds.min_health_score,
                observed: metrics.health_score,
                threshold: thresholds.min_health_score,
            },
        ];

        CriteriaReport {
            overall_success: details.iter().all(|d| d.passed),
            details,
        }
    }

    /// Advance exactly one phase if the success criteria hold.
    ///
    /// State is unchanged when validation fails.
    #[instrument(skip(self, metrics))]
    pub async fn advance_phase(&self, metrics: &MigrationMetrics) -> Result<MigrationState> {
        let mut state = self.state.write().await;
        let from = state.phase;

        let Some(to) = from.next() else {
            return Err(MigrationError::InvalidTransition {
                from,
                reason: "already at the final phase".to_string(),
            });
        };
        if state.forced_compatibility {
            return Err(MigrationError::InvalidTransition {
                from,
                reason: "compatibility mode is forced".to_string(),
            });
        }

        let report = self.validate_success_criteria(metrics);
        if !report.overall_success {
            warn!(phase = %from, failures = %report.failure_summary(), "Phase advance rejected");
            return Err(MigrationError::MigrationValidationFailure {
                phase: from,
                report,
            });
        }

        let mut next = state.clone();
        next.phase = to;
        next.updated_at = self.clock.now();
        self.persistence.save(keys::MIGRATION_STATE, &next).await?;
        *state = next.clone();

        info!(from = %from, to = %to, "Migration phase advanced");
        self.emit(MigrationEvent::PhaseAdvanced {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(next)
    }

    /// Change the rollout strategy and percentage.
    pub async fn set_rollout(&self, strategy: RolloutStrategy, percentage: u8) -> Result<MigrationState> {
        if percentage > 100 {
            return Err(MigrationError::InvalidRollout(format!(
                "percentage {percentage} exceeds 100"
            )));
        }

        let next = self
            .transition(|state| {
                state.rollout_strategy = strategy;
                state.rollout_percentage = percentage;
            })
            .await?;

        info!(strategy = %strategy, percentage, "Rollout updated");
        self.emit(MigrationEvent::RolloutChanged {
            strategy: strategy.to_string(),
            percentage,
        });
        Ok(next)
    }

    /// Route every subject to the compatibility path, regardless of phase.
    pub async fn force_compatibility_mode(&self, reason: &str) -> Result<MigrationState> {
        let next = self
            .transition(|state| {
                state.forced_compatibility = true;
                state.forced_reason = Some(reason.to_string());
            })
            .await?;

        warn!(reason, "Compatibility mode forced");
        self.emit(MigrationEvent::CompatibilityForced {
            reason: reason.to_string(),
        });
        Ok(next)
    }

    pub async fn clear_forced_compatibility(&self) -> Result<MigrationState> {
        let next = self
            .transition(|state| {
                state.forced_compatibility = false;
                state.forced_reason = None;
                state.rollback_level = RollbackLevel::None;
            })
            .await?;
        info!("Forced compatibility cleared");
        Ok(next)
    }

    /// Roll back to `CompatibilityOnly` with compatibility forced.
    #[instrument(skip(self, metadata))]
    pub async fn trigger_rollback(
        &self,
        reason: &str,
        level: RollbackLevel,
        metadata: RollbackMetadata,
    ) -> Result<RollbackRecord> {
        self.rollback(reason, level, metadata, false).await
    }

    /// Roll back at `FeatureFlag` level when metrics breach the success
    /// criteria for the configured number of consecutive evaluations.
    /// Windows with fewer than `min_sample_size` samples neither count as a
    /// breach nor reset the streak.
    ///
    /// Returns the rollback record when one was triggered.
    pub async fn evaluate_automatic_rollback(
        &self,
        metrics: &MigrationMetrics,
    ) -> Result<Option<RollbackRecord>> {
        if !self.settings.auto_rollback_enabled {
            return Ok(None);
        }

        let phase = self.state.read().await.phase;
        if phase == MigrationPhase::CompatibilityOnly {
            self.consecutive_breaches.store(0, Ordering::SeqCst);
            return Ok(None);
        }

        let min_samples = self.settings.thresholds.min_sample_size;
        if metrics.sample_size < min_samples {
            debug!(
                samples = metrics.sample_size,
                min_samples, "Too few samples to evaluate rollback"
            );
            return Ok(None);
        }

        let report = self.validate_success_criteria(metrics);
        if report.overall_success {
            self.consecutive_breaches.store(0, Ordering::SeqCst);
            return Ok(None);
        }

        let breaches = self.consecutive_breaches.fetch_add(1, Ordering::SeqCst) + 1;
        let required = self.settings.thresholds.consecutive_breaches_required.max(1);
        debug!(breaches, required, "Success criteria breached");
        if breaches < required {
            return Ok(None);
        }

        self.consecutive_breaches.store(0, Ordering::SeqCst);
        let reason = format!("automatic rollback: {}", report.failure_summary());
        let record = self
            .rollback(
                &reason,
                RollbackLevel::FeatureFlag,
                RollbackMetadata::from_metrics(metrics),
                true,
            )
            .await?;
        Ok(Some(record))
    }

    /// Rollback records, oldest first.
    pub async fn rollback_history(&self) -> Vec<RollbackRecord> {
        self.rollback_log.read().await.iter().cloned().collect()
    }

    async fn rollback(
        &self,
        reason: &str,
        level: RollbackLevel,
        metadata: RollbackMetadata,
        automatic: bool,
    ) -> Result<RollbackRecord> {
        let mut state = self.state.write().await;
        let now = self.clock.now();

        let record = RollbackRecord {
            reason: reason.to_string(),
            level,
            triggered_at: now,
            automatic,
            phase_before: state.phase,
            metadata,
        };

        let mut log = self.rollback_log.write().await;
        let mut next_log = log.clone();
        next_log.push_back(record.clone());
        while next_log.len() > ROLLBACK_LOG_LIMIT {
            next_log.pop_front();
        }

        let mut next = state.clone();
        next.phase = MigrationPhase::CompatibilityOnly;
        next.forced_compatibility = true;
        next.forced_reason = Some(reason.to_string());
        next.rollback_level = level;
        next.updated_at = now;

        // State first: a log entry must never describe a rollback that did not happen
        self.persistence.save(keys::MIGRATION_STATE, &next).await?;
        *state = next;
        self.persistence
            .save(keys::ROLLBACK_LOG, &next_log.iter().collect::<Vec<_>>())
            .await?;
        *log = next_log;

        warn!(
            reason,
            level = %level,
            automatic,
            phase_before = %record.phase_before,
            "Migration rolled back"
        );
        self.emit(MigrationEvent::RolledBack {
            reason: reason.to_string(),
            level: level.to_string(),
            automatic,
        });
        Ok(record)
    }

    async fn transition<F>(&self, apply: F) -> Result<MigrationState>
    where
        F: FnOnce(&mut MigrationState),
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        apply(&mut next);
        next.updated_at = self.clock.now();
        self.persistence.save(keys::MIGRATION_STATE, &next).await?;
        *state = next.clone();
        Ok(next)
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Migration(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::MemoryKeyValueStore;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::KeyValueStore;
    use bridge_traits::time::ManualClock;
    use std::sync::atomic::AtomicBool;
    use chrono::{TimeZone, Utc};
    use core_runtime::config::MigrationThresholds;

    fn healthy() -> MigrationMetrics {
        MigrationMetrics {
            error_rate: 0.01,
            avg_response_time_ms: 300.0,
            health_score: 0.95,
            sample_size: 500,
        }
    }

    fn failing() -> MigrationMetrics {
        MigrationMetrics {
            error_rate: 0.08,
            ..healthy()
        }
    }

    fn controller_with(settings: MigrationSettings) -> (Arc<MemoryKeyValueStore>, MigrationController) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap(),
        ));
        let controller = MigrationController::new(PersistentStore::new(kv.clone()), clock, settings);
        (kv, controller)
    }

    fn controller() -> MigrationController {
        controller_with(MigrationSettings::default()).1
    }

    /// Memory store that rejects writes to one key once armed.
    struct FlakyStore {
        inner: MemoryKeyValueStore,
        failing_key: &'static str,
        armed: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            if self.armed.load(Ordering::SeqCst) && key == self.failing_key {
                return Err(BridgeError::StorageError("disk full".to_string()));
            }
            self.inner.set_string(key, value).await
        }

        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            self.inner.get_string(key).await
        }

        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.inner.delete(key).await
        }

        async fn list_keys(&self, prefix: &str) -> BridgeResult<Vec<String>> {
            self.inner.list_keys(prefix).await
        }
    }

    async fn advance_to(controller: &MigrationController, phase: MigrationPhase) {
        while controller.state().await.phase < phase {
            controller.advance_phase(&healthy()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_advance_one_phase_at_a_time() {
        let controller = controller();
        let state = controller.advance_phase(&healthy()).await.unwrap();
        assert_eq!(state.phase, MigrationPhase::InternalTesting);

        advance_to(&controller, MigrationPhase::LegacyRemoval).await;
        let result = controller.advance_phase(&healthy()).await;
        assert!(matches!(result, Err(MigrationError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_failed_validation_leaves_state_unchanged() {
        let controller = controller();
        let before = controller.state().await;

        let result = controller.advance_phase(&failing()).await;
        match result {
            Err(MigrationError::MigrationValidationFailure { phase, report }) => {
                assert_eq!(phase, MigrationPhase::CompatibilityOnly);
                assert!(report.is_failing(Criterion::ErrorRate));
                assert!(!report.is_failing(Criterion::HealthScore));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(controller.state().await, before);
    }

    #[tokio::test]
    async fn test_criteria_defaults() {
        let controller = controller();
        let report = controller.validate_success_criteria(&MigrationMetrics {
            error_rate: 0.05,
            avg_response_time_ms: 2_000.0,
            health_score: 0.7,
            sample_size: 10,
        });
        assert!(report.overall_success);

        let report = controller.validate_success_criteria(&MigrationMetrics {
            error_rate: 0.0,
            avg_response_time_ms: 2_500.0,
            health_score: 0.6,
            sample_size: 10,
        });
        assert!(!report.overall_success);
        assert_eq!(report.failed().count(), 2);
    }

    #[tokio::test]
    async fn test_routing_by_phase() {
        let settings = MigrationSettings {
            internal_identifiers: vec!["staff-1".into()],
            ..MigrationSettings::default()
        };
        let (_, controller) = controller_with(settings);

        assert!(!controller.use_modern_path("staff-1").await);

        advance_to(&controller, MigrationPhase::InternalTesting).await;
        assert!(controller.use_modern_path("staff-1").await);
        assert!(!controller.use_modern_path("user-1").await);

        advance_to(&controller, MigrationPhase::GradualRollout).await;
        controller.set_rollout(RolloutStrategy::AllUsers, 0).await.unwrap();
        assert!(controller.use_modern_path("user-1").await);

        controller.set_rollout(RolloutStrategy::Percentage, 0).await.unwrap();
        assert!(!controller.use_modern_path("user-1").await);
        controller.set_rollout(RolloutStrategy::Percentage, 100).await.unwrap();
        assert!(controller.use_modern_path("user-1").await);

        controller.set_rollout(RolloutStrategy::DevOnly, 100).await.unwrap();
        assert!(!controller.use_modern_path("user-1").await);

        advance_to(&controller, MigrationPhase::FullDeployment).await;
        assert!(controller.use_modern_path("user-1").await);
    }

    #[tokio::test]
    async fn test_forced_compatibility_overrides_phase() {
        let controller = controller();
        advance_to(&controller, MigrationPhase::FullDeployment).await;
        assert!(controller.use_modern_path("anyone").await);

        controller.force_compatibility_mode("incident").await.unwrap();
        assert!(!controller.use_modern_path("anyone").await);
        assert_eq!(controller.state().await.phase, MigrationPhase::FullDeployment);

        controller.clear_forced_compatibility().await.unwrap();
        assert!(controller.use_modern_path("anyone").await);
    }

    #[tokio::test]
    async fn test_rollout_percentage_is_validated() {
        let controller = controller();
        let result = controller.set_rollout(RolloutStrategy::Percentage, 101).await;
        assert!(matches!(result, Err(MigrationError::InvalidRollout(_))));
    }

    #[tokio::test]
    async fn test_manual_rollback_resets_phase() {
        let controller = controller();
        advance_to(&controller, MigrationPhase::GradualRollout).await;

        let record = controller
            .trigger_rollback(
                "bad release",
                RollbackLevel::Restart,
                RollbackMetadata::default().with_note("ticket 12"),
            )
            .await
            .unwrap();
        assert_eq!(record.phase_before, MigrationPhase::GradualRollout);
        assert!(!record.automatic);

        let state = controller.state().await;
        assert_eq!(state.phase, MigrationPhase::CompatibilityOnly);
        assert!(state.forced_compatibility);
        assert_eq!(state.rollback_level, RollbackLevel::Restart);
    }

    #[tokio::test]
    async fn test_high_error_rate_triggers_feature_flag_rollback() {
        let controller = controller();
        advance_to(&controller, MigrationPhase::GradualRollout).await;

        assert!(controller
            .evaluate_automatic_rollback(&healthy())
            .await
            .unwrap()
            .is_none());

        let record = controller
            .evaluate_automatic_rollback(&failing())
            .await
            .unwrap()
            .expect("rollback triggered");
        assert!(record.automatic);
        assert_eq!(record.level, RollbackLevel::FeatureFlag);
        assert_eq!(record.metadata.error_rate, Some(0.08));

        let state = controller.state().await;
        assert_eq!(state.phase, MigrationPhase::CompatibilityOnly);
        assert_eq!(state.rollback_level, RollbackLevel::FeatureFlag);
        assert!(!controller.use_modern_path("user-1").await);
    }

    #[tokio::test]
    async fn test_small_sample_does_not_trigger_rollback() {
        let controller = controller();
        advance_to(&controller, MigrationPhase::GradualRollout).await;

        let single_failure = MigrationMetrics {
            error_rate: 1.0,
            sample_size: 1,
            ..healthy()
        };
        for _ in 0..5 {
            assert!(controller
                .evaluate_automatic_rollback(&single_failure)
                .await
                .unwrap()
                .is_none());
        }

        let state = controller.state().await;
        assert_eq!(state.phase, MigrationPhase::GradualRollout);
        assert!(!state.forced_compatibility);
        assert!(controller.rollback_history().await.is_empty());

        let sustained = MigrationMetrics {
            sample_size: 20,
            ..single_failure
        };
        assert!(controller
            .evaluate_automatic_rollback(&sustained)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_state_write_leaves_no_rollback_record() {
        let kv = Arc::new(FlakyStore {
            inner: MemoryKeyValueStore::new(),
            failing_key: keys::MIGRATION_STATE,
            armed: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap(),
        ));
        let controller = MigrationController::new(
            PersistentStore::new(kv.clone()),
            clock.clone(),
            MigrationSettings::default(),
        );
        advance_to(&controller, MigrationPhase::GradualRollout).await;

        kv.armed.store(true, Ordering::SeqCst);
        let result = controller
            .trigger_rollback("incident", RollbackLevel::FeatureFlag, RollbackMetadata::default())
            .await;
        assert!(result.is_err());
        assert!(controller.rollback_history().await.is_empty());
        assert_eq!(controller.state().await.phase, MigrationPhase::GradualRollout);

        kv.armed.store(false, Ordering::SeqCst);
        let restored =
            MigrationController::new(PersistentStore::new(kv), clock, MigrationSettings::default());
        let state = restored.load().await.unwrap();
        assert_eq!(state.phase, MigrationPhase::GradualRollout);
        assert!(restored.rollback_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_breaches_required() {
        let settings = MigrationSettings {
            thresholds: MigrationThresholds {
                consecutive_breaches_required: 2,
                ..MigrationThresholds::default()
            },
            ..MigrationSettings::default()
        };
        let (_, controller) = controller_with(settings);
        advance_to(&controller, MigrationPhase::GradualRollout).await;

        assert!(controller.evaluate_automatic_rollback(&failing()).await.unwrap().is_none());
        assert!(controller.evaluate_automatic_rollback(&healthy()).await.unwrap().is_none());
        assert!(controller.evaluate_automatic_rollback(&failing()).await.unwrap().is_none());
        assert!(controller.evaluate_automatic_rollback(&failing()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_log_is_bounded_and_persisted() {
        let (kv, controller) = controller_with(MigrationSettings::default());
        for i in 0..(ROLLBACK_LOG_LIMIT + 5) {
            controller
                .trigger_rollback(&format!("r{i}"), RollbackLevel::FeatureFlag, RollbackMetadata::default())
                .await
                .unwrap();
        }

        let history = controller.rollback_history().await;
        assert_eq!(history.len(), ROLLBACK_LOG_LIMIT);
        assert_eq!(history[0].reason, "r5");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let restored =
            MigrationController::new(PersistentStore::new(kv), clock, MigrationSettings::default());
        let state = restored.load().await.unwrap();
        assert!(state.forced_compatibility);
        assert_eq!(restored.rollback_history().await.len(), ROLLBACK_LOG_LIMIT);
    }
}
