//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the daily content cache engine and
//! platform-specific implementations. Each trait represents a capability that
//! the engine requires but that must be implemented differently per platform
//! (desktop, iOS, Android, web).
//!
//! ## Traits
//!
//! ### Remote & Connectivity
//! - [`ContentProvider`](content::ContentProvider) - Fetch-by-date contract to the content backend
//! - [`ConnectivityMonitor`](network::ConnectivityMonitor) - Online/offline status and transitions
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable string storage under fixed keys
//!
//! ### Platform Integration
//! - [`LifecycleObserver`](background::LifecycleObserver) - App foreground/background transitions
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`TimezoneProvider`](time::TimezoneProvider) - UTC offset resolution, DST aware
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Provide actionable error messages
//! - Include error context (storage key, endpoint, zone name)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds on native targets to support
//! safe concurrent usage across async tasks.
//!
//! ## Examples
//!
//! ### Implementing ContentProvider
//!
//! ```ignore
//! use bridge_traits::content::{Content, ContentProvider};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//! use chrono::NaiveDate;
//!
//! pub struct StaticProvider {
//!     content: Content,
//! }
//!
//! #[async_trait]
//! impl ContentProvider for StaticProvider {
//!     async fn fetch(&self, date: NaiveDate) -> Result<Option<Content>> {
//!         Ok((self.content.date == date).then(|| self.content.clone()))
//!     }
//! }
//! ```

pub mod background;
pub mod content;
pub mod error;
pub mod network;
pub mod platform;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use content::{Content, ContentPayload, ContentProvider};
pub use network::{ConnectivityMonitor, ConnectivityStatus, ConnectivityStream};
pub use storage::KeyValueStore;
pub use time::{
    Clock, ConsoleLogger, FixedTimezone, LogEntry, LogLevel, LoggerSink, ManualClock,
    SystemClock, TimezoneProvider,
};
