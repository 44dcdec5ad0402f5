use core_cache::CacheError;
use thiserror::Error;

use crate::models::{CriteriaReport, MigrationPhase};

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Success criteria not met for {phase}: {}", .report.failure_summary())]
    MigrationValidationFailure {
        phase: MigrationPhase,
        report: CriteriaReport,
    },

    #[error("Invalid transition from {from}: {reason}")]
    InvalidTransition { from: MigrationPhase, reason: String },

    #[error("Invalid rollout: {0}")]
    InvalidRollout(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, MigrationError>;
