//! # Health
//!
//! Integrity checks over the persisted cache and queue, plus a weighted health
//! score:
//!
//! ```text
//! score = 1 - (0.4 * staleness + 0.3 * backlog + 0.3 * failure_rate)
//! ```
//!
//! | score       | status      |
//! |-------------|-------------|
//! | `>= 0.8`    | `Healthy`   |
//! | `>= 0.5`    | `Degraded`  |
//! | otherwise   | `Unhealthy` |

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::events::{EngineEvent, EventBus, HealthEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::content_store::ContentStore;
use crate::error::Result;
use crate::offline_queue::OfflineQueue;

const STALENESS_WEIGHT: f64 = 0.4;
const BACKLOG_WEIGHT: f64 = 0.3;
const FAILURE_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            HealthStatus::Healthy
        } else if score >= 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    MissingCurrentEntry,
    DuplicateDate,
    TimestampOrder,
    VersionAhead,
    QueueOverCapacity,
    RetriesExceeded,
    DuplicateActionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub code: IssueCode,
    pub severity: IssueSeverity,
    pub message: String,
}

impl IntegrityIssue {
    fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: IssueSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// False when any issue has `Error` severity
    pub passed: bool,
    pub issues: Vec<IntegrityIssue>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn errors(&self) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == IssueSeverity::Error)
    }
}

/// Component scores behind a health score, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthFactors {
    pub staleness_ratio: f64,
    pub backlog_ratio: f64,
    pub failure_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub score: f64,
    pub status: HealthStatus,
    pub factors: HealthFactors,
    pub computed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn from_factors(factors: HealthFactors, computed_at: DateTime<Utc>) -> Self {
        let penalty = STALENESS_WEIGHT * factors.staleness_ratio.clamp(0.0, 1.0)
            + BACKLOG_WEIGHT * factors.backlog_ratio.clamp(0.0, 1.0)
            + FAILURE_WEIGHT * factors.failure_rate.clamp(0.0, 1.0);
        let score = (1.0 - penalty).clamp(0.0, 1.0);
        Self {
            score,
            status: HealthStatus::from_score(score),
            factors,
            computed_at,
        }
    }
}

/// Sliding window of recent sync outcomes.
#[derive(Debug)]
pub struct SyncOutcomeLog {
    window: usize,
    outcomes: std::sync::Mutex<VecDeque<bool>>,
}

impl SyncOutcomeLog {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    fn record(&self, success: bool) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(success);
            while outcomes.len() > self.window {
                outcomes.pop_front();
            }
        }
    }

    /// Fraction of failed outcomes in the window; zero when empty.
    pub fn failure_rate(&self) -> f64 {
        match self.outcomes.lock() {
            Ok(outcomes) if !outcomes.is_empty() => {
                let failures = outcomes.iter().filter(|ok| !**ok).count();
                failures as f64 / outcomes.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct HealthService {
    content: Arc<ContentStore>,
    queue: OfflineQueue,
    outcomes: Arc<SyncOutcomeLog>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    last_snapshot: Mutex<Option<HealthSnapshot>>,
}

impl HealthService {
    pub fn new(
        content: Arc<ContentStore>,
        queue: OfflineQueue,
        outcomes: Arc<SyncOutcomeLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            content,
            queue,
            outcomes,
            clock,
            events: None,
            last_snapshot: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn outcomes(&self) -> &Arc<SyncOutcomeLog> {
        &self.outcomes
    }

    /// Validate persisted invariants.
    ///
    /// A missing current entry is reported as a warning: an empty cache is a
    /// valid state on first launch.
    pub async fn integrity_check(&self) -> IntegrityReport {
        let snapshot = self.content.snapshot().await;
        let actions = self.queue.peek_all().await;
        let mut issues = Vec::new();

        match &snapshot.current {
            None => issues.push(IntegrityIssue::warning(
                IssueCode::MissingCurrentEntry,
                "no current content entry",
            )),
            Some(current) => {
                if snapshot.history.iter().any(|e| e.date() == current.date()) {
                    issues.push(IntegrityIssue::error(
                        IssueCode::DuplicateDate,
                        format!("date {} present in both current entry and history", current.date()),
                    ));
                }
                if current.version > snapshot.version {
                    issues.push(IntegrityIssue::error(
                        IssueCode::VersionAhead,
                        format!(
                            "entry version {} ahead of cache version {}",
                            current.version, snapshot.version
                        ),
                    ));
                }
            }
        }

        for entry in snapshot.current.iter().chain(snapshot.history.iter()) {
            if !entry.timestamps_ordered() {
                issues.push(IntegrityIssue::error(
                    IssueCode::TimestampOrder,
                    format!("entry {} has disordered timestamps", entry.content_id()),
                ));
            }
        }

        if actions.len() > self.queue.capacity() {
            issues.push(IntegrityIssue::error(
                IssueCode::QueueOverCapacity,
                format!("{} actions exceed capacity {}", actions.len(), self.queue.capacity()),
            ));
        }

        let mut seen = HashSet::new();
        for action in &actions {
            if action.retry_count > action.max_retries {
                issues.push(IntegrityIssue::error(
                    IssueCode::RetriesExceeded,
                    format!("action {} exceeded its retries", action.action_id),
                ));
            }
            if !seen.insert(action.action_id) {
                issues.push(IntegrityIssue::error(
                    IssueCode::DuplicateActionId,
                    format!("action {} queued twice", action.action_id),
                ));
            }
        }

        let report = IntegrityReport {
            passed: !issues.iter().any(|i| i.severity == IssueSeverity::Error),
            issues,
            checked_at: self.clock.now(),
        };

        if !report.passed {
            let count = report.errors().count();
            warn!(issues = count, "Integrity check failed");
            self.emit(HealthEvent::IntegrityFailed { issues: count });
        }
        report
    }

    /// Repair what the integrity check flags. Returns the number of fixes.
    pub async fn repair(&self) -> Result<usize> {
        let content_fixes = self.content.repair().await?;
        let queue_fixes = self.queue.repair().await?;
        let total = content_fixes + queue_fixes;
        if total > 0 {
            info!(content_fixes, queue_fixes, "Repaired cache state");
        }
        Ok(total)
    }

    /// Compute the current health score.
    pub async fn health_score(&self) -> HealthSnapshot {
        let factors = HealthFactors {
            staleness_ratio: self.staleness_ratio().await,
            backlog_ratio: self.queue.stats().await.backlog_ratio(),
            failure_rate: self.outcomes.failure_rate(),
        };
        let snapshot = HealthSnapshot::from_factors(factors, self.clock.now());

        *self.last_snapshot.lock().await = Some(snapshot.clone());
        self.emit(HealthEvent::ScoreComputed {
            score_percent: (snapshot.score * 100.0).round() as u8,
            status: snapshot.status.to_string(),
        });
        snapshot
    }

    pub async fn last_snapshot(&self) -> Option<HealthSnapshot> {
        self.last_snapshot.lock().await.clone()
    }

    /// 0.0 when fresh, rising through the grace window, 1.0 when unservable.
    async fn staleness_ratio(&self) -> f64 {
        let snapshot = self.content.snapshot().await;
        let Some(entry) = snapshot.current else {
            return 1.0;
        };
        let now = self.clock.now();
        let version_outdated = entry.version < snapshot.version;

        if !entry.within_grace(now) {
            return 1.0;
        }
        if !entry.is_expired(now) {
            return if version_outdated { 0.5 } else { 0.0 };
        }

        let grace = (entry.stale_after - entry.expires_at).num_seconds().max(1) as f64;
        let elapsed = (now - entry.expires_at).num_seconds().max(0) as f64;
        let ratio = (elapsed / grace).clamp(0.0, 1.0);
        if version_outdated {
            ratio.max(0.5)
        } else {
            ratio
        }
    }

    fn emit(&self, event: HealthEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Health(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use crate::persistence::PersistentStore;
    use bridge_desktop::MemoryKeyValueStore;
    use bridge_traits::content::{Content, ContentPayload};
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, NaiveDate, TimeZone};
    use core_runtime::config::{CacheSettings, QueueSettings};

    struct Fixture {
        clock: Arc<ManualClock>,
        content: Arc<ContentStore>,
        queue: OfflineQueue,
        health: HealthService,
    }

    fn fixture(max_pending: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap(),
        ));
        let persistence = PersistentStore::new(Arc::new(MemoryKeyValueStore::new()));
        let content = Arc::new(ContentStore::new(
            persistence.clone(),
            clock.clone(),
            CacheSettings::default(),
        ));
        let queue = OfflineQueue::new(
            persistence,
            clock.clone(),
            QueueSettings {
                max_pending,
                ..QueueSettings::default()
            },
        );
        let health = HealthService::new(
            content.clone(),
            queue.clone(),
            Arc::new(SyncOutcomeLog::new(10)),
            clock.clone(),
        );
        Fixture {
            clock,
            content,
            queue,
            health,
        }
    }

    async fn put_today(f: &Fixture) {
        let content = Content::new(
            "c-1",
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            ContentPayload {
                title: "t".into(),
                summary: "s".into(),
                body: "b".into(),
                topic: None,
                reading_minutes: None,
            },
        );
        let midnight = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        f.content
            .put(f.content.entry_for(content, midnight))
            .await
            .unwrap();
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(HealthStatus::from_score(1.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.8), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(0.79), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(0.5), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(0.49), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_score_weights() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        let snapshot = HealthSnapshot::from_factors(
            HealthFactors {
                staleness_ratio: 1.0,
                backlog_ratio: 0.0,
                failure_rate: 0.0,
            },
            now,
        );
        assert!((snapshot.score - 0.6).abs() < 1e-9);
        assert_eq!(snapshot.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_outcome_log_window() {
        let log = SyncOutcomeLog::new(4);
        assert_eq!(log.failure_rate(), 0.0);

        log.record_failure();
        log.record_failure();
        log.record_success();
        log.record_success();
        assert!((log.failure_rate() - 0.5).abs() < 1e-9);

        log.record_success();
        log.record_success();
        assert_eq!(log.len(), 4);
        assert_eq!(log.failure_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_empty_cache_passes_with_warning() {
        let f = fixture(10);
        let report = f.health.integrity_check().await;

        assert!(report.passed);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code, IssueCode::MissingCurrentEntry);
        assert_eq!(report.issues[0].severity, IssueSeverity::Warning);
    }

    #[tokio::test]
    async fn test_fresh_cache_is_healthy() {
        let f = fixture(10);
        put_today(&f).await;

        let report = f.health.integrity_check().await;
        assert!(report.passed);
        assert!(report.issues.is_empty());

        let snapshot = f.health.health_score().await;
        assert_eq!(snapshot.factors.staleness_ratio, 0.0);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(f.health.last_snapshot().await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_score_degrades_with_staleness_backlog_and_failures() {
        let f = fixture(4);
        put_today(&f).await;
        for i in 0..4 {
            f.queue
                .enqueue(ActionKind::GenericSync {
                    topic: format!("t{i}"),
                    fields: Default::default(),
                })
                .await
                .unwrap();
        }
        f.health.outcomes().record_failure();
        f.clock
            .set(Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap());

        let snapshot = f.health.health_score().await;
        assert_eq!(snapshot.factors.staleness_ratio, 1.0);
        assert_eq!(snapshot.factors.backlog_ratio, 1.0);
        assert_eq!(snapshot.factors.failure_rate, 1.0);
        assert_eq!(snapshot.score, 0.0);
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_staleness_rises_through_grace_window() {
        let f = fixture(10);
        put_today(&f).await;
        f.clock.set(
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap() + Duration::hours(12),
        );

        let snapshot = f.health.health_score().await;
        assert!((snapshot.factors.staleness_ratio - 0.5).abs() < 1e-9);
    }
}
