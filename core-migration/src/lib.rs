//! # Core Migration
//!
//! Staged rollout of the modern cache path.
//!
//! The [`MigrationController`] owns a persisted [`MigrationState`] and moves it
//! through the phases one step at a time:
//!
//! ```text
//! CompatibilityOnly → InternalTesting → GradualRollout → FullDeployment → LegacyRemoval
//! ```
//!
//! Each advance is gated by success criteria over [`MigrationMetrics`]. A
//! rollback, manual or automatic, forces compatibility mode and resets the
//! phase to `CompatibilityOnly`.

pub mod controller;
pub mod error;
pub mod models;
pub mod rollout;

pub use controller::MigrationController;
pub use error::{MigrationError, Result};
pub use models::{
    CriteriaReport, Criterion, CriterionResult, MigrationMetrics, MigrationPhase, MigrationState,
    RollbackLevel, RollbackMetadata, RollbackRecord, RolloutStrategy,
};
