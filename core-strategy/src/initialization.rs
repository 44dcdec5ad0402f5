//! # Initialization Strategies
//!
//! | Kind          | Steps                                                      |
//! |---------------|------------------------------------------------------------|
//! | `ColdStart`   | restore, subscribe, arm all timers, warm content           |
//! | `WarmRestart` | restore, subscribe, arm all timers                         |
//! | `MinimalTest` | restore                                                    |
//! | `Background`  | restore, subscribe, arm refresh timer                      |
//! | `Recovery`    | restore, integrity check, repair if needed, then cold start |
//!
//! Selection priority: test context, prior error, recent restart,
//! backgrounded, otherwise cold start.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationKind {
    ColdStart,
    WarmRestart,
    MinimalTest,
    Background,
    Recovery,
}

impl InitializationKind {
    pub fn strategy(self) -> Box<dyn InitializationStrategy> {
        match self {
            InitializationKind::ColdStart => Box::new(ColdStart),
            InitializationKind::WarmRestart => Box::new(WarmRestart),
            InitializationKind::MinimalTest => Box::new(MinimalTest),
            InitializationKind::Background => Box::new(Background),
            InitializationKind::Recovery => Box::new(Recovery),
        }
    }
}

impl fmt::Display for InitializationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitializationKind::ColdStart => "cold_start",
            InitializationKind::WarmRestart => "warm_restart",
            InitializationKind::MinimalTest => "minimal_test",
            InitializationKind::Background => "background",
            InitializationKind::Recovery => "recovery",
        };
        f.write_str(name)
    }
}

/// Inputs to strategy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationContext {
    pub test_mode: bool,
    /// Error recorded by the previous initialization, if it failed
    pub previous_error: Option<String>,
    pub last_initialized_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    /// How recent a previous initialization must be to count as a restart
    pub warm_restart_window: Duration,
    pub is_backgrounded: bool,
}

impl InitializationContext {
    pub fn is_recent_restart(&self) -> bool {
        self.last_initialized_at
            .map(|at| at <= self.now && self.now - at <= self.warm_restart_window)
            .unwrap_or(false)
    }
}

/// Choose an initialization strategy.
pub fn select_initialization(ctx: &InitializationContext) -> InitializationKind {
    if ctx.test_mode {
        InitializationKind::MinimalTest
    } else if ctx.previous_error.is_some() {
        InitializationKind::Recovery
    } else if ctx.is_recent_restart() {
        InitializationKind::WarmRestart
    } else if ctx.is_backgrounded {
        InitializationKind::Background
    } else {
        InitializationKind::ColdStart
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStep {
    RestoreState,
    IntegrityCheck,
    Repair,
    SubscribeConnectivity,
    ArmRefreshTimer,
    ArmBackgroundTimers,
    WarmContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationReport {
    pub kind: InitializationKind,
    /// Steps completed, in order
    pub steps: Vec<InitStep>,
    pub repaired: usize,
    /// Set when the warm-up fetch failed; initialization still succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_error: Option<String>,
}

impl InitializationReport {
    fn new(kind: InitializationKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            repaired: 0,
            warm_error: None,
        }
    }

    pub fn ran(&self, step: InitStep) -> bool {
        self.steps.contains(&step)
    }
}

/// Operations a strategy drives. Implemented by the coordinator.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait InitializationTarget: Send + Sync {
    /// Load persisted state into memory.
    async fn restore_state(&self) -> Result<()>;

    /// Returns whether persisted state passed the integrity check.
    async fn check_integrity(&self) -> Result<bool>;

    /// Returns the number of repairs applied.
    async fn repair(&self) -> Result<usize>;

    async fn subscribe_connectivity(&self) -> Result<()>;

    async fn arm_refresh_timer(&self) -> Result<()>;

    /// Timezone watch, periodic maintenance and metrics.
    async fn arm_background_timers(&self) -> Result<()>;

    /// Eagerly fetch today's content.
    async fn warm_content(&self) -> Result<()>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait InitializationStrategy: Send + Sync {
    fn kind(&self) -> InitializationKind;

    fn estimated_duration(&self) -> StdDuration;

    /// Approximate peak memory in bytes.
    fn memory_requirement(&self) -> u64;

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport>;
}

async fn cold_start_flow(
    target: &dyn InitializationTarget,
    report: &mut InitializationReport,
) -> Result<()> {
    target.subscribe_connectivity().await?;
    report.steps.push(InitStep::SubscribeConnectivity);
    arm_all_timers(target, report).await?;

    match target.warm_content().await {
        Ok(()) => report.steps.push(InitStep::WarmContent),
        Err(error) => {
            warn!(error = %error, "Warm-up fetch failed, continuing");
            report.warm_error = Some(error.to_string());
        }
    }
    Ok(())
}

async fn arm_all_timers(
    target: &dyn InitializationTarget,
    report: &mut InitializationReport,
) -> Result<()> {
    target.arm_refresh_timer().await?;
    report.steps.push(InitStep::ArmRefreshTimer);
    target.arm_background_timers().await?;
    report.steps.push(InitStep::ArmBackgroundTimers);
    Ok(())
}

async fn restore(target: &dyn InitializationTarget, report: &mut InitializationReport) -> Result<()> {
    target.restore_state().await?;
    report.steps.push(InitStep::RestoreState);
    Ok(())
}

pub struct ColdStart;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationStrategy for ColdStart {
    fn kind(&self) -> InitializationKind {
        InitializationKind::ColdStart
    }

    fn estimated_duration(&self) -> StdDuration {
        StdDuration::from_millis(1_500)
    }

    fn memory_requirement(&self) -> u64 {
        4 * 1024 * 1024
    }

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport> {
        let mut report = InitializationReport::new(self.kind());
        restore(target, &mut report).await?;
        cold_start_flow(target, &mut report).await?;
        info!(steps = report.steps.len(), "Cold start complete");
        Ok(report)
    }
}

pub struct WarmRestart;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationStrategy for WarmRestart {
    fn kind(&self) -> InitializationKind {
        InitializationKind::WarmRestart
    }

    fn estimated_duration(&self) -> StdDuration {
        StdDuration::from_millis(300)
    }

    fn memory_requirement(&self) -> u64 {
        2 * 1024 * 1024
    }

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport> {
        let mut report = InitializationReport::new(self.kind());
        restore(target, &mut report).await?;
        target.subscribe_connectivity().await?;
        report.steps.push(InitStep::SubscribeConnectivity);
        arm_all_timers(target, &mut report).await?;
        Ok(report)
    }
}

pub struct MinimalTest;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationStrategy for MinimalTest {
    fn kind(&self) -> InitializationKind {
        InitializationKind::MinimalTest
    }

    fn estimated_duration(&self) -> StdDuration {
        StdDuration::from_millis(10)
    }

    fn memory_requirement(&self) -> u64 {
        256 * 1024
    }

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport> {
        let mut report = InitializationReport::new(self.kind());
        restore(target, &mut report).await?;
        debug!("Minimal initialization: no network, no timers");
        Ok(report)
    }
}

pub struct Background;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationStrategy for Background {
    fn kind(&self) -> InitializationKind {
        InitializationKind::Background
    }

    fn estimated_duration(&self) -> StdDuration {
        StdDuration::from_millis(200)
    }

    fn memory_requirement(&self) -> u64 {
        1024 * 1024
    }

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport> {
        let mut report = InitializationReport::new(self.kind());
        restore(target, &mut report).await?;
        target.subscribe_connectivity().await?;
        report.steps.push(InitStep::SubscribeConnectivity);
        target.arm_refresh_timer().await?;
        report.steps.push(InitStep::ArmRefreshTimer);
        Ok(report)
    }
}

pub struct Recovery;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl InitializationStrategy for Recovery {
    fn kind(&self) -> InitializationKind {
        InitializationKind::Recovery
    }

    fn estimated_duration(&self) -> StdDuration {
        StdDuration::from_millis(2_500)
    }

    fn memory_requirement(&self) -> u64 {
        6 * 1024 * 1024
    }

    async fn execute(&self, target: &dyn InitializationTarget) -> Result<InitializationReport> {
        let mut report = InitializationReport::new(self.kind());
        restore(target, &mut report).await?;

        let passed = target.check_integrity().await?;
        report.steps.push(InitStep::IntegrityCheck);
        if !passed {
            report.repaired = target.repair().await?;
            report.steps.push(InitStep::Repair);
            warn!(repaired = report.repaired, "Recovered from inconsistent state");
        }

        cold_start_flow(target, &mut report).await?;
        Ok(report)
    }
}
