//! # Core Cache
//!
//! Durable client-side state for the daily content engine:
//!
//! - [`content_store`]: current entry, per-date history and cache versioning
//! - [`offline_queue`]: bounded FIFO of actions recorded while offline
//! - [`scheduler`]: refresh timer aligned to local midnight
//! - [`maintenance`]: selective cleanup of expired data
//! - [`health`]: integrity checks and the weighted health score
//!
//! All state is persisted through [`persistence::PersistentStore`], which wraps
//! the host [`KeyValueStore`](bridge_traits::storage::KeyValueStore) in a
//! versioned envelope.

pub mod content_store;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod models;
pub mod offline_queue;
pub mod persistence;
pub mod scheduler;

pub use content_store::{ContentStats, ContentStore, HistoryIter, InvalidationOutcome};
pub use error::{CacheError, Result};
pub use health::{
    HealthFactors, HealthService, HealthSnapshot, HealthStatus, IntegrityIssue, IntegrityReport,
    IssueCode, IssueSeverity, SyncOutcomeLog,
};
pub use maintenance::{CleanupStats, MaintenanceService};
pub use models::{to_chrono, ActionKind, CacheEntry, PendingAction, ScheduleState};
pub use offline_queue::{ActionSyncer, DrainReport, EnqueueOutcome, OfflineQueue, QueueStats};
pub use persistence::PersistentStore;
pub use scheduler::{next_local_midnight, DueCallback, RefreshScheduler};
