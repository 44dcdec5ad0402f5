use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("{step} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Engine disposed")]
    Disposed,
}

impl StrategyError {
    pub fn step(step: impl Into<String>, error: impl std::fmt::Display) -> Self {
        StrategyError::StepFailed {
            step: step.into(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StrategyError>;
