//! # Metrics Aggregator
//!
//! Gathers a point-in-time report across every engine component. Each
//! sub-collection runs concurrently under its own timeout; a failed
//! sub-collection is recorded in [`MetricsReport::collection_errors`] and the
//! rest of the report is still produced.
//!
//! Derived analysis:
//!
//! | Field        | Meaning                                                   |
//! |--------------|-----------------------------------------------------------|
//! | `components` | per-category score in `0.0..=1.0`                         |
//! | `bottleneck` | category with the lowest score                            |
//! | `overall`    | mean of component scores                                  |
//! | `grade`      | A (>= 0.9), B (>= 0.8), C (>= 0.7), D (>= 0.6), otherwise F |
//! | `trend`      | overall score compared with the previous report           |

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_cache::{
    ContentStats, ContentStore, HealthService, HealthSnapshot, IntegrityReport, OfflineQueue,
    QueueStats, RefreshScheduler, ScheduleState,
};
use core_migration::{MigrationController, MigrationMetrics, MigrationState, RollbackLevel};
use core_runtime::config::MetricsSettings;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const COLLECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Content,
    Queue,
    Scheduler,
    Health,
    Integrity,
    Performance,
    Migration,
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricCategory::Content => "content",
            MetricCategory::Queue => "queue",
            MetricCategory::Scheduler => "scheduler",
            MetricCategory::Health => "health",
            MetricCategory::Integrity => "integrity",
            MetricCategory::Performance => "performance",
            MetricCategory::Migration => "migration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Grade::A
        } else if score >= 0.8 {
            Grade::B
        } else if score >= 0.7 {
            Grade::C
        } else if score >= 0.6 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

/// Response-time and outcome statistics for remote operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub samples: u64,
    pub avg_response_ms: f64,
    pub max_response_ms: f64,
    /// Fraction of failed operations, `0.0..=1.0`
    pub error_rate: f64,
}

/// Sliding window of remote operation timings.
#[derive(Debug)]
pub struct PerformanceTracker {
    window: usize,
    samples: std::sync::Mutex<VecDeque<(f64, bool)>>,
}

impl PerformanceTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, elapsed: Duration, success: bool) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push_back((elapsed.as_secs_f64() * 1_000.0, success));
            while samples.len() > self.window {
                samples.pop_front();
            }
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        let Ok(samples) = self.samples.lock() else {
            return PerformanceStats::default();
        };
        if samples.is_empty() {
            return PerformanceStats::default();
        }

        let count = samples.len() as f64;
        let total: f64 = samples.iter().map(|(ms, _)| ms).sum();
        let max = samples.iter().map(|(ms, _)| *ms).fold(0.0, f64::max);
        let failures = samples.iter().filter(|(_, ok)| !ok).count() as f64;

        PerformanceStats {
            samples: samples.len() as u64,
            avg_response_ms: total / count,
            max_response_ms: max,
            error_rate: failures / count,
        }
    }
}

/// Scheduler view included in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub armed: bool,
    pub schedule: Option<ScheduleState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub category: MetricCategory,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionError {
    pub category: MetricCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub collected_at: DateTime<Utc>,
    pub content: Option<ContentStats>,
    pub queue: Option<QueueStats>,
    pub scheduler: Option<SchedulerMetrics>,
    pub health: Option<HealthSnapshot>,
    pub integrity: Option<IntegrityReport>,
    pub performance: Option<PerformanceStats>,
    pub migration: Option<MigrationState>,
    pub components: Vec<ComponentScore>,
    pub bottleneck: Option<MetricCategory>,
    pub overall: f64,
    pub grade: Grade,
    pub trend: Trend,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_errors: Vec<CollectionError>,
}

impl MetricsReport {
    pub fn score(&self, category: MetricCategory) -> Option<f64> {
        self.components
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.score)
    }

    /// Inputs for migration success criteria.
    ///
    /// `None` when no remote operation has been observed yet.
    pub fn migration_metrics(&self) -> Option<MigrationMetrics> {
        let performance = self.performance?;
        if performance.samples == 0 {
            return None;
        }
        Some(MigrationMetrics {
            error_rate: performance.error_rate,
            avg_response_time_ms: performance.avg_response_ms,
            health_score: self.health.as_ref().map(|h| h.score).unwrap_or(self.overall),
            sample_size: performance.samples,
        })
    }
}

pub struct MetricsAggregator {
    content: Arc<ContentStore>,
    queue: OfflineQueue,
    scheduler: RefreshScheduler,
    health: Arc<HealthService>,
    migration: Arc<MigrationController>,
    performance: Arc<PerformanceTracker>,
    clock: Arc<dyn Clock>,
    settings: MetricsSettings,
    history: Mutex<VecDeque<MetricsReport>>,
}

impl MetricsAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: Arc<ContentStore>,
        queue: OfflineQueue,
        scheduler: RefreshScheduler,
        health: Arc<HealthService>,
        migration: Arc<MigrationController>,
        performance: Arc<PerformanceTracker>,
        clock: Arc<dyn Clock>,
        settings: MetricsSettings,
    ) -> Self {
        Self {
            content,
            queue,
            scheduler,
            health,
            migration,
            performance,
            clock,
            settings,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn performance(&self) -> &Arc<PerformanceTracker> {
        &self.performance
    }

    /// Collect a report and append it to the bounded history.
    ///
    /// Overlapping calls are serialized on the history lock so each report is
    /// compared against the one collected immediately before it.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> MetricsReport {
        let mut history = self.history.lock().await;

        let (content, queue, scheduler, health, integrity, performance, migration) = futures::join!(
            bounded(MetricCategory::Content, self.content.stats()),
            bounded(MetricCategory::Queue, self.queue.stats()),
            bounded(MetricCategory::Scheduler, async {
                SchedulerMetrics {
                    armed: self.scheduler.is_armed().await,
                    schedule: self.scheduler.state().await,
                }
            }),
            bounded(MetricCategory::Health, self.health.health_score()),
            bounded(MetricCategory::Integrity, self.health.integrity_check()),
            bounded(MetricCategory::Performance, async { self.performance.stats() }),
            bounded(MetricCategory::Migration, self.migration.state()),
        );

        let mut collection_errors = Vec::new();
        let content = settle(content, &mut collection_errors);
        let queue = settle(queue, &mut collection_errors);
        let scheduler = settle(scheduler, &mut collection_errors);
        let health = settle(health, &mut collection_errors);
        let integrity = settle(integrity, &mut collection_errors);
        let performance = settle(performance, &mut collection_errors);
        let migration = settle(migration, &mut collection_errors);

        let max_response_ms = self.migration.settings().thresholds.max_response_time_ms as f64;
        let mut components = Vec::new();
        if let Some(stats) = &content {
            components.push(ComponentScore {
                category: MetricCategory::Content,
                score: content_score(stats),
            });
        }
        if let Some(stats) = &queue {
            components.push(ComponentScore {
                category: MetricCategory::Queue,
                score: queue_score(stats),
            });
        }
        if let Some(metrics) = &scheduler {
            components.push(ComponentScore {
                category: MetricCategory::Scheduler,
                score: scheduler_score(metrics),
            });
        }
        if let Some(snapshot) = &health {
            components.push(ComponentScore {
                category: MetricCategory::Health,
                score: snapshot.score,
            });
        }
        if let Some(report) = &integrity {
            components.push(ComponentScore {
                category: MetricCategory::Integrity,
                score: integrity_score(report),
            });
        }
        if let Some(stats) = &performance {
            components.push(ComponentScore {
                category: MetricCategory::Performance,
                score: performance_score(stats, max_response_ms),
            });
        }
        if let Some(state) = &migration {
            components.push(ComponentScore {
                category: MetricCategory::Migration,
                score: migration_score(state),
            });
        }

        let overall = if components.is_empty() {
            0.0
        } else {
            components.iter().map(|c| c.score).sum::<f64>() / components.len() as f64
        };
        let bottleneck = components
            .iter()
            .min_by(|a, b| a.score.total_cmp(&b.score))
            .map(|c| c.category);
        let trend = trend(
            history.back().map(|previous| previous.overall),
            overall,
            self.settings.trend_tolerance,
        );

        let report = MetricsReport {
            collected_at: self.clock.now(),
            content,
            queue,
            scheduler,
            health,
            integrity,
            performance,
            migration,
            components,
            bottleneck,
            overall,
            grade: Grade::from_score(overall),
            trend,
            collection_errors,
        };

        history.push_back(report.clone());
        while history.len() > self.settings.history_size.max(1) {
            history.pop_front();
        }

        debug!(
            overall = report.overall,
            grade = ?report.grade,
            trend = ?report.trend,
            errors = report.collection_errors.len(),
            "Metrics collected"
        );
        report
    }

    /// Previously collected reports, oldest first.
    pub async fn history(&self) -> Vec<MetricsReport> {
        self.history.lock().await.iter().cloned().collect()
    }
}

async fn bounded<T, F>(category: MetricCategory, future: F) -> Result<T, CollectionError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(COLLECTION_TIMEOUT, future)
        .await
        .map_err(|_| CollectionError {
            category,
            message: format!("timed out after {}ms", COLLECTION_TIMEOUT.as_millis()),
        })
}

fn settle<T>(result: Result<T, CollectionError>, errors: &mut Vec<CollectionError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(category = %error.category, message = %error.message, "Metric collection failed");
            errors.push(error);
            None
        }
    }
}

fn content_score(stats: &ContentStats) -> f64 {
    if stats.is_fresh {
        1.0
    } else if stats.is_servable_stale {
        0.6
    } else if stats.has_current {
        0.3
    } else {
        0.0
    }
}

fn queue_score(stats: &QueueStats) -> f64 {
    let penalty = 0.1 * f64::from(stats.consecutive_failed_cycles);
    (1.0 - stats.backlog_ratio() - penalty).clamp(0.0, 1.0)
}

fn scheduler_score(metrics: &SchedulerMetrics) -> f64 {
    match (metrics.armed, metrics.schedule.is_some()) {
        (true, _) => 1.0,
        (false, true) => 0.5,
        (false, false) => 0.0,
    }
}

fn integrity_score(report: &IntegrityReport) -> f64 {
    let errors = report.errors().count() as f64;
    (1.0 - 0.25 * errors).clamp(0.0, 1.0)
}

fn performance_score(stats: &PerformanceStats, max_response_ms: f64) -> f64 {
    if stats.samples == 0 {
        return 1.0;
    }
    let latency = if stats.avg_response_ms <= max_response_ms || stats.avg_response_ms <= 0.0 {
        1.0
    } else {
        max_response_ms / stats.avg_response_ms
    };
    ((1.0 - stats.error_rate) * latency).clamp(0.0, 1.0)
}

fn migration_score(state: &MigrationState) -> f64 {
    if state.rollback_level != RollbackLevel::None {
        0.5
    } else {
        1.0
    }
}

fn trend(previous: Option<f64>, current: f64, tolerance: f64) -> Trend {
    match previous {
        Some(previous) if current - previous > tolerance => Trend::Improving,
        Some(previous) if previous - current > tolerance => Trend::Declining,
        _ => Trend::Stable,
    }
}
