use core_cache::CacheError;
use core_migration::MigrationError;
use core_strategy::StrategyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Engine disposed")]
    Disposed,

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
