use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    CompatibilityOnly,
    InternalTesting,
    GradualRollout,
    FullDeployment,
    LegacyRemoval,
}

impl MigrationPhase {
    /// The phase after this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            MigrationPhase::CompatibilityOnly => Some(MigrationPhase::InternalTesting),
            MigrationPhase::InternalTesting => Some(MigrationPhase::GradualRollout),
            MigrationPhase::GradualRollout => Some(MigrationPhase::FullDeployment),
            MigrationPhase::FullDeployment => Some(MigrationPhase::LegacyRemoval),
            MigrationPhase::LegacyRemoval => None,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::CompatibilityOnly => "compatibility_only",
            MigrationPhase::InternalTesting => "internal_testing",
            MigrationPhase::GradualRollout => "gradual_rollout",
            MigrationPhase::FullDeployment => "full_deployment",
            MigrationPhase::LegacyRemoval => "legacy_removal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    AllUsers,
    /// Stable hash bucket `0..100` below the rollout percentage
    Percentage,
    /// Coarse cohort `0..10` below `percentage / 10`
    UserHashBucket,
    InternalOnly,
    DevOnly,
}

impl fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RolloutStrategy::AllUsers => "all_users",
            RolloutStrategy::Percentage => "percentage",
            RolloutStrategy::UserHashBucket => "user_hash_bucket",
            RolloutStrategy::InternalOnly => "internal_only",
            RolloutStrategy::DevOnly => "dev_only",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackLevel {
    None,
    FeatureFlag,
    Restart,
    Data,
    FullSystem,
}

impl fmt::Display for RollbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RollbackLevel::None => "none",
            RollbackLevel::FeatureFlag => "feature_flag",
            RollbackLevel::Restart => "restart",
            RollbackLevel::Data => "data",
            RollbackLevel::FullSystem => "full_system",
        };
        f.write_str(name)
    }
}

/// Persisted rollout state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub phase: MigrationPhase,
    pub rollout_strategy: RolloutStrategy,
    /// `0..=100`
    pub rollout_percentage: u8,
    pub forced_compatibility: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_reason: Option<String>,
    pub rollback_level: RollbackLevel,
    pub updated_at: DateTime<Utc>,
}

impl MigrationState {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            phase: MigrationPhase::CompatibilityOnly,
            rollout_strategy: RolloutStrategy::Percentage,
            rollout_percentage: 0,
            forced_compatibility: false,
            forced_reason: None,
            rollback_level: RollbackLevel::None,
            updated_at: now,
        }
    }
}

/// Observed behaviour of the modern path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MigrationMetrics {
    /// Fraction of failed operations, `0.0..=1.0`
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    /// `0.0..=1.0`
    pub health_score: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    ErrorRate,
    ResponseTime,
    HealthScore,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::ErrorRate => "error rate",
            Criterion::ResponseTime => "response time",
            Criterion::HealthScore => "health score",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: Criterion,
    pub passed: bool,
    pub observed: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaReport {
    pub overall_success: bool,
    pub details: Vec<CriterionResult>,
}

impl CriteriaReport {
    pub fn failed(&self) -> impl Iterator<Item = &CriterionResult> {
        self.details.iter().filter(|d| !d.passed)
    }

    pub fn is_failing(&self, criterion: Criterion) -> bool {
        self.failed().any(|d| d.criterion == criterion)
    }

    /// e.g. `"error rate 0.080 (limit 0.050)"`
    pub fn failure_summary(&self) -> String {
        let parts: Vec<String> = self
            .failed()
            .map(|d| format!("{} {:.3} (limit {:.3})", d.criterion, d.observed, d.threshold))
            .collect();
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Typed context recorded with a rollback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RollbackMetadata {
    pub fn from_metrics(metrics: &MigrationMetrics) -> Self {
        Self {
            error_rate: Some(metrics.error_rate),
            response_time_ms: Some(metrics.avg_response_time_ms),
            health_score: Some(metrics.health_score),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub reason: String,
    pub level: RollbackLevel,
    pub triggered_at: DateTime<Utc>,
    pub automatic: bool,
    pub phase_before: MigrationPhase,
    #[serde(default)]
    pub metadata: RollbackMetadata,
}
