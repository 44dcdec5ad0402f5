use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Engine not initialized: {0}")]
    NotInitialized(String),

    #[error("Content fetch failed: {0}")]
    FetchFailure(String),

    #[error("Corrupt persisted data under {key}: {message}")]
    SerializationFailure { key: String, message: String },

    #[error("Offline queue full (capacity {capacity}); evicted action {evicted_action_id}")]
    QueueOverflow {
        capacity: usize,
        evicted_action_id: String,
    },

    #[error("Action {action_id} dropped after {retry_count} failed attempts")]
    RetryExhausted { action_id: String, retry_count: u32 },

    #[error("Timezone detection failed: {0}")]
    TimezoneDetectionFailure(String),

    #[error("Action sync failed: {0}")]
    SyncFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Engine disposed")]
    Disposed,
}

impl CacheError {
    /// Whether the failure leaves cached data usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CacheError::Disposed | CacheError::NotInitialized(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
