//! Remote Content Source Abstraction
//!
//! The engine only needs one remote capability: fetch the content item for a
//! calendar date. Everything else about the backend (generation, scoring,
//! authentication) stays on the host side of this seam.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{error::Result, platform::PlatformSendSync};

/// Body of a daily content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub title: String,
    pub summary: String,
    pub body: String,
    /// Optional topic or category tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Estimated reading time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_minutes: Option<u32>,
}

/// A daily content item as returned by the remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Server-side identifier
    pub content_id: String,
    /// Calendar date this content is for
    pub date: NaiveDate,
    pub payload: ContentPayload,
}

impl Content {
    pub fn new(content_id: impl Into<String>, date: NaiveDate, payload: ContentPayload) -> Self {
        Self {
            content_id: content_id.into(),
            date,
            payload,
        }
    }
}

/// Remote content provider trait
///
/// `fetch` may trigger asynchronous server-side generation; a provider that
/// has nothing for the date yet returns `Ok(None)`.
///
/// # Error Handling
///
/// Failures are returned as [`BridgeError`](crate::error::BridgeError). The
/// engine never lets them escape to consumers; it degrades to cached data.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::content::ContentProvider;
///
/// async fn today(provider: &dyn ContentProvider, date: NaiveDate) -> Option<Content> {
///     provider.fetch(date).await.ok().flatten()
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait ContentProvider: PlatformSendSync {
    /// Fetch the content item for `date`
    async fn fetch(&self, date: NaiveDate) -> Result<Option<Content>>;
}
