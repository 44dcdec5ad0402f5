//! # Optimization Strategies
//!
//! Selection is a pure function of [`OptimizationContext`]:
//!
//! 1. memory pressure → `MemoryOptimized`
//! 2. recent performance issue → `PerformanceOptimized`
//! 3. heavy usage on a high-capability device → `Aggressive`
//! 4. light usage or a low-capability device → `Conservative`
//! 5. otherwise → `Balanced`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCapability {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePattern {
    Light,
    Moderate,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptimizationContext {
    pub device_capability: DeviceCapability,
    pub usage_pattern: UsagePattern,
    pub memory_pressure: bool,
    pub recent_performance_issue: bool,
}

impl Default for OptimizationContext {
    fn default() -> Self {
        Self {
            device_capability: DeviceCapability::Medium,
            usage_pattern: UsagePattern::Moderate,
            memory_pressure: false,
            recent_performance_issue: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    MemoryOptimized,
    PerformanceOptimized,
    Aggressive,
    Conservative,
    Balanced,
}

impl OptimizationKind {
    pub fn strategy(self) -> Box<dyn OptimizationStrategy> {
        Box::new(PlannedOptimization::for_kind(self))
    }
}

impl fmt::Display for OptimizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizationKind::MemoryOptimized => "memory_optimized",
            OptimizationKind::PerformanceOptimized => "performance_optimized",
            OptimizationKind::Aggressive => "aggressive",
            OptimizationKind::Conservative => "conservative",
            OptimizationKind::Balanced => "balanced",
        };
        f.write_str(name)
    }
}

/// Choose an optimization strategy.
pub fn select_optimization(ctx: &OptimizationContext) -> OptimizationKind {
    if ctx.memory_pressure {
        OptimizationKind::MemoryOptimized
    } else if ctx.recent_performance_issue {
        OptimizationKind::PerformanceOptimized
    } else if ctx.usage_pattern == UsagePattern::Heavy
        && ctx.device_capability == DeviceCapability::High
    {
        OptimizationKind::Aggressive
    } else if ctx.usage_pattern == UsagePattern::Light
        || ctx.device_capability == DeviceCapability::Low
    {
        OptimizationKind::Conservative
    } else {
        OptimizationKind::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub kind: OptimizationKind,
    pub memory_freed: u64,
    /// Observed change in average remote response time across the run;
    /// positive is faster. `None` when no timings were available.
    pub performance_delta_percent: Option<f64>,
    pub entries_optimized: usize,
}

/// Operations a strategy drives. Implemented by the coordinator.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait OptimizationTarget: Send + Sync {
    /// Keep only the `keep` newest history entries. Returns `(removed, bytes)`.
    async fn trim_history(&self, keep: usize) -> Result<(usize, u64)>;

    /// Drop queued actions past their maximum age. Returns `(removed, bytes)`.
    async fn prune_queue(&self) -> Result<(usize, u64)>;

    /// Remove history whose grace window has closed. Returns `(removed, bytes)`.
    async fn purge_expired(&self) -> Result<(usize, u64)>;

    /// Revalidate the current entry if it is no longer fresh. Returns the
    /// number of entries refreshed.
    async fn warm_cache(&self) -> Result<usize>;

    /// Average remote response time over the recent window, if any.
    fn average_response_ms(&self) -> Option<f64> {
        None
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait OptimizationStrategy: Send + Sync {
    fn kind(&self) -> OptimizationKind;

    async fn execute(&self, target: &dyn OptimizationTarget) -> Result<OptimizationOutcome>;
}

/// Table-driven plan shared by every optimization kind.
///
/// History retention tightens from `Conservative` (untouched) through
/// `Balanced` and `Aggressive` to `MemoryOptimized`, which keeps the least.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PlannedOptimization {
    kind: OptimizationKind,
    history_keep: Option<usize>,
    prune_queue: bool,
    purge_expired: bool,
    warm_cache: bool,
}

impl PlannedOptimization {
    fn for_kind(kind: OptimizationKind) -> Self {
        let base = Self {
            kind,
            history_keep: None,
            prune_queue: false,
            purge_expired: true,
            warm_cache: false,
        };
        match kind {
            OptimizationKind::MemoryOptimized => Self {
                history_keep: Some(1),
                prune_queue: true,
                ..base
            },
            OptimizationKind::PerformanceOptimized => Self {
                warm_cache: true,
                ..base
            },
            OptimizationKind::Aggressive => Self {
                history_keep: Some(3),
                prune_queue: true,
                warm_cache: true,
                ..base
            },
            OptimizationKind::Conservative => base,
            OptimizationKind::Balanced => Self {
                history_keep: Some(7),
                ..base
            },
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl OptimizationStrategy for PlannedOptimization {
    fn kind(&self) -> OptimizationKind {
        self.kind
    }

    async fn execute(&self, target: &dyn OptimizationTarget) -> Result<OptimizationOutcome> {
        let mut memory_freed = 0u64;
        let mut entries_optimized = 0usize;
        let response_before = target.average_response_ms();

        if self.purge_expired {
            let (removed, bytes) = target.purge_expired().await?;
            entries_optimized += removed;
            memory_freed += bytes;
        }
        if let Some(keep) = self.history_keep {
            let (removed, bytes) = target.trim_history(keep).await?;
            entries_optimized += removed;
            memory_freed += bytes;
        }
        if self.prune_queue {
            let (removed, bytes) = target.prune_queue().await?;
            entries_optimized += removed;
            memory_freed += bytes;
        }
        if self.warm_cache {
            entries_optimized += target.warm_cache().await?;
        }

        let performance_delta_percent =
            latency_delta_percent(response_before, target.average_response_ms());

        info!(
            kind = %self.kind,
            memory_freed,
            entries_optimized,
            performance_delta_percent,
            "Optimization complete"
        );
        Ok(OptimizationOutcome {
            kind: self.kind,
            memory_freed,
            performance_delta_percent,
            entries_optimized,
        })
    }
}

/// Relative drop in average response time; positive means faster.
fn latency_delta_percent(before: Option<f64>, after: Option<f64>) -> Option<f64> {
    match (before, after) {
        (Some(before), Some(after)) if before > 0.0 => Some((before - after) / before * 100.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Target {}

        #[async_trait]
        impl OptimizationTarget for Target {
            async fn trim_history(&self, keep: usize) -> Result<(usize, u64)>;
            async fn prune_queue(&self) -> Result<(usize, u64)>;
            async fn purge_expired(&self) -> Result<(usize, u64)>;
            async fn warm_cache(&self) -> Result<usize>;
            fn average_response_ms(&self) -> Option<f64>;
        }
    }

    fn ctx(
        device_capability: DeviceCapability,
        usage_pattern: UsagePattern,
        memory_pressure: bool,
        recent_performance_issue: bool,
    ) -> OptimizationContext {
        OptimizationContext {
            device_capability,
            usage_pattern,
            memory_pressure,
            recent_performance_issue,
        }
    }

    #[test]
    fn test_selection_priority() {
        use DeviceCapability::*;
        use UsagePattern::*;

        assert_eq!(
            select_optimization(&ctx(High, Heavy, true, true)),
            OptimizationKind::MemoryOptimized
        );
        assert_eq!(
            select_optimization(&ctx(High, Heavy, false, true)),
            OptimizationKind::PerformanceOptimized
        );
        assert_eq!(
            select_optimization(&ctx(High, Heavy, false, false)),
            OptimizationKind::Aggressive
        );
        assert_eq!(
            select_optimization(&ctx(Low, Heavy, false, false)),
            OptimizationKind::Conservative
        );
        assert_eq!(
            select_optimization(&ctx(High, Light, false, false)),
            OptimizationKind::Conservative
        );
        assert_eq!(
            select_optimization(&ctx(Medium, Moderate, false, false)),
            OptimizationKind::Balanced
        );
    }

    #[test]
    fn test_selection_is_deterministic_over_all_contexts() {
        let devices = [DeviceCapability::Low, DeviceCapability::Medium, DeviceCapability::High];
        let usages = [UsagePattern::Light, UsagePattern::Moderate, UsagePattern::Heavy];

        for device in devices {
            for usage in usages {
                for pressure in [false, true] {
                    for issue in [false, true] {
                        let c = ctx(device, usage, pressure, issue);
                        assert_eq!(select_optimization(&c), select_optimization(&c));
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_memory_optimized_trims_and_prunes() {
        let mut target = MockTarget::new();
        target.expect_average_response_ms().returning(|| None);
        target.expect_purge_expired().times(1).returning(|| Ok((1, 100)));
        target
            .expect_trim_history()
            .withf(|keep| *keep == 1)
            .times(1)
            .returning(|_| Ok((2, 400)));
        target.expect_prune_queue().times(1).returning(|| Ok((0, 0)));
        target.expect_warm_cache().never();

        let outcome = OptimizationKind::MemoryOptimized
            .strategy()
            .execute(&target)
            .await
            .unwrap();
        assert_eq!(outcome.kind, OptimizationKind::MemoryOptimized);
        assert_eq!(outcome.memory_freed, 500);
        assert_eq!(outcome.entries_optimized, 3);
        assert_eq!(outcome.performance_delta_percent, None);
    }

    #[test]
    fn test_memory_optimized_keeps_least_history() {
        let keep = |kind| PlannedOptimization::for_kind(kind).history_keep;

        let memory = keep(OptimizationKind::MemoryOptimized).unwrap();
        let aggressive = keep(OptimizationKind::Aggressive).unwrap();
        let balanced = keep(OptimizationKind::Balanced).unwrap();
        assert!(memory < aggressive);
        assert!(aggressive < balanced);
        assert_eq!(keep(OptimizationKind::Conservative), None);
        assert_eq!(keep(OptimizationKind::PerformanceOptimized), None);

        let memory_plan = PlannedOptimization::for_kind(OptimizationKind::MemoryOptimized);
        assert!(memory_plan.prune_queue);
        assert!(!memory_plan.warm_cache);
    }

    #[tokio::test]
    async fn test_conservative_only_purges_expired() {
        let mut target = MockTarget::new();
        target.expect_average_response_ms().returning(|| Some(200.0));
        target.expect_purge_expired().times(1).returning(|| Ok((0, 0)));
        target.expect_trim_history().never();
        target.expect_prune_queue().never();
        target.expect_warm_cache().never();

        let outcome = OptimizationKind::Conservative
            .strategy()
            .execute(&target)
            .await
            .unwrap();
        assert_eq!(outcome.memory_freed, 0);
        assert_eq!(outcome.performance_delta_percent, Some(0.0));
    }

    #[tokio::test]
    async fn test_performance_delta_is_measured_around_warmup() {
        let mut target = MockTarget::new();
        let mut seq = mockall::Sequence::new();
        target
            .expect_average_response_ms()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Some(400.0));
        target
            .expect_average_response_ms()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Some(300.0));
        target.expect_purge_expired().returning(|| Ok((0, 0)));
        target.expect_warm_cache().times(1).returning(|| Ok(1));
        target.expect_trim_history().never();

        let outcome = OptimizationKind::PerformanceOptimized
            .strategy()
            .execute(&target)
            .await
            .unwrap();
        assert_eq!(outcome.entries_optimized, 1);
        assert_eq!(outcome.performance_delta_percent, Some(25.0));
    }

    #[test]
    fn test_latency_delta_requires_timings() {
        assert_eq!(latency_delta_percent(None, Some(10.0)), None);
        assert_eq!(latency_delta_percent(Some(0.0), Some(10.0)), None);
        assert_eq!(latency_delta_percent(Some(100.0), Some(150.0)), Some(-50.0));
    }

    #[test]
    fn test_context_serde_uses_snake_case() {
        let json = serde_json::to_string(&OptimizationContext::default()).unwrap();
        assert!(json.contains("\"medium\""));
        assert!(json.contains("\"moderate\""));
    }
}
