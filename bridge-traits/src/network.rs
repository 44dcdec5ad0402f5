//! Connectivity Abstraction
//!
//! Provides online/offline status and a stream of transitions.

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    platform::{PlatformSend, PlatformSendSync},
};

/// Connectivity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    /// Remote content source is reachable
    Online,
    /// No usable network
    Offline,
    /// Status unknown or indeterminate
    Unknown,
}

impl ConnectivityStatus {
    /// Only a positive `Online` counts as reachable.
    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityStatus::Online)
    }
}

/// Connectivity monitor trait
///
/// The engine reads the current status on demand and subscribes to
/// transitions exactly once during initialization. It never polls.
///
/// # Platform Support
///
/// - **Desktop**: Reachability check
/// - **iOS**: NWPathMonitor
/// - **Android**: ConnectivityManager callbacks
/// - **Web**: `online` / `offline` window events
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::ConnectivityMonitor;
///
/// async fn watch(monitor: &dyn ConnectivityMonitor) -> Result<()> {
///     let mut stream = monitor.subscribe_changes().await?;
///     while let Some(status) = stream.next().await {
///         if status.is_online() {
///             drain_queue().await;
///         }
///     }
///     Ok(())
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait ConnectivityMonitor: PlatformSendSync {
    /// Get current connectivity status
    async fn current_status(&self) -> Result<ConnectivityStatus>;

    /// Check if currently online
    async fn is_online(&self) -> bool {
        matches!(self.current_status().await, Ok(ConnectivityStatus::Online))
    }

    /// Subscribe to connectivity transitions
    ///
    /// Implementations should emit an event whenever the status changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn ConnectivityStream>>;
}

/// Stream of connectivity transitions
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait ConnectivityStream: PlatformSend {
    /// Get the next status update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<ConnectivityStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_status() {
        assert!(ConnectivityStatus::Online.is_online());
        assert!(!ConnectivityStatus::Offline.is_online());
        assert!(!ConnectivityStatus::Unknown.is_online());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ConnectivityStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
    }
}
