//! # Versioned Persistence
//!
//! Every value the engine writes to the host [`KeyValueStore`] is wrapped in a
//! small JSON envelope carrying the schema version:
//!
//! ```json
//! { "schema_version": 1, "data": { ... } }
//! ```
//!
//! Values written by a newer schema are decoded best-effort: unknown fields are
//! ignored, so an app downgrade keeps queued actions and migration state.
//! Values that fail to decode are reported as
//! [`CacheError::SerializationFailure`].
//! Callers that can degrade use [`PersistentStore::load_or_default`], which logs
//! the data-integrity issue and falls back to an empty state.

use bridge_traits::storage::KeyValueStore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Fixed storage keys.
pub mod keys {
    /// Key prefix shared by every engine value
    pub const PREFIX: &str = "daily_cache.";

    pub const CURRENT_ENTRY: &str = "daily_cache.current_entry";
    pub const HISTORY: &str = "daily_cache.history";
    pub const CACHE_VERSION: &str = "daily_cache.cache_version";
    pub const PENDING_ACTIONS: &str = "daily_cache.pending_actions";
    pub const SCHEDULE_STATE: &str = "daily_cache.schedule_state";
    pub const MIGRATION_STATE: &str = "daily_cache.migration_state";
    pub const ROLLBACK_LOG: &str = "daily_cache.rollback_log";
    pub const INIT_RECORD: &str = "daily_cache.init_record";
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema_version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    data: T,
}

/// Typed, versioned access to the host key-value store.
#[derive(Clone)]
pub struct PersistentStore {
    store: Arc<dyn KeyValueStore>,
}

impl PersistentStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Serialize and durably write `value` under `key`.
    ///
    /// Returns the number of bytes written.
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<usize> {
        let encoded = serde_json::to_string(&EnvelopeRef {
            schema_version: SCHEMA_VERSION,
            data: value,
        })
        .map_err(|e| CacheError::SerializationFailure {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        self.store.set_string(key, &encoded).await?;
        debug!(key, bytes = encoded.len(), "Persisted value");
        Ok(encoded.len())
    }

    /// Read and decode the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get_string(key).await? else {
            return Ok(None);
        };

        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(&raw).map_err(|e| CacheError::SerializationFailure {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let newer = envelope.schema_version > SCHEMA_VERSION;
        if newer {
            warn!(
                key,
                schema_version = envelope.schema_version,
                supported = SCHEMA_VERSION,
                "Decoding value written by a newer schema"
            );
        }

        let data = serde_json::from_value(envelope.data).map_err(|e| {
            CacheError::SerializationFailure {
                key: key.to_string(),
                message: if newer {
                    format!(
                        "schema version {} is newer than supported version {}: {}",
                        envelope.schema_version, SCHEMA_VERSION, e
                    )
                } else {
                    e.to_string()
                },
            }
        })?;
        Ok(Some(data))
    }

    /// Like [`load`](Self::load), but corrupt data degrades to `T::default()`.
    ///
    /// Storage failures still propagate; only undecodable values are replaced.
    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        self.load_optional(key).await.map(Option::unwrap_or_default)
    }

    /// Like [`load`](Self::load), but corrupt data degrades to `None`.
    pub async fn load_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load(key).await {
            Ok(value) => Ok(value),
            Err(err @ CacheError::SerializationFailure { .. }) => {
                warn!(key, error = %err, "Discarding corrupt persisted value");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.delete(key).await?;
        Ok(())
    }

    /// Remove every engine key.
    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear_prefix(keys::PREFIX).await?;
        Ok(())
    }
}

/// Approximate serialized size of a value, used for "bytes freed" reporting.
pub fn encoded_size<T: Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}
