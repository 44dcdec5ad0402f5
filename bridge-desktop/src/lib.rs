//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `KeyValueStore` using SQLite (`sqlx`), plus an in-memory store for tests
//! - `ContentProvider` using `reqwest`
//! - `ConnectivityMonitor` using a TCP reachability check, plus a host-driven monitor
//! - `TimezoneProvider` using the OS zone or an IANA zone from `chrono-tz`
//! - `LifecycleObserver` as no-op (desktop always foreground)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestContentProvider, SqliteKeyValueStore, SystemTimezone};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let store = SqliteKeyValueStore::default_location().await?;
//!     let provider = ReqwestContentProvider::new("https://api.example.com")?;
//!     let timezone = SystemTimezone::new();
//!
//!     // Use in engine dependencies
//!     Ok(())
//! }
//! ```

mod content;
mod lifecycle;
mod network;
mod store;
mod timezone;

pub use content::ReqwestContentProvider;
pub use lifecycle::DesktopLifecycleObserver;
pub use network::{DesktopConnectivityMonitor, ManualConnectivityMonitor};
pub use store::{MemoryKeyValueStore, SqliteKeyValueStore};
pub use timezone::{NamedTimezone, SystemTimezone};
