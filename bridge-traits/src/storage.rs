//! Key-Value Storage Abstraction
//!
//! The engine persists its content entry, history, pending actions, schedule
//! and migration state as serialized strings under fixed keys. Hosts provide
//! the backing store (SQLite on desktop, SharedPreferences / UserDefaults on
//! mobile, IndexedDB on web).

use crate::{error::Result, platform::PlatformSendSync};

/// Persistent key-value store trait
///
/// Values are opaque strings; the engine wraps each value in its own
/// versioned envelope so the host never needs to understand the payload.
///
/// # Durability
///
/// A successful `set_string` must be durable before it resolves. The engine
/// treats storage as the source of truth and only commits in-memory state
/// after the write returns.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember(store: &dyn KeyValueStore) -> Result<()> {
///     store.set_string("daily_cache.cache_version", "{\"schema_version\":1,\"data\":3}").await?;
///     let raw = store.get_string("daily_cache.cache_version").await?;
///     assert!(raw.is_some());
///     Ok(())
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait KeyValueStore: PlatformSendSync {
    /// Store a string value, replacing any previous value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    ///
    /// Returns `None` if the key doesn't exist.
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key
    ///
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    /// List keys starting with the given prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key starting with the given prefix
    async fn clear_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.list_keys(prefix).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
