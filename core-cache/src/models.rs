//! Persisted data model for the cache and the offline queue.

use bridge_traits::content::Content;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Cache entries
// ============================================================================

/// A cached content item together with its freshness metadata.
///
/// Timestamps satisfy `fetched_at <= expires_at <= stale_after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: Content,
    /// Cache version this entry was stored under
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    /// End of the fresh window
    pub expires_at: DateTime<Utc>,
    /// End of the stale-but-servable window
    pub stale_after: DateTime<Utc>,
    /// Set when the entry was served as a substitute for a newer item
    #[serde(default)]
    pub is_fallback: bool,
}

impl CacheEntry {
    /// Build an entry whose fresh window ends at `min(fetched_at + ttl, next_midnight)`.
    pub fn from_fetch(
        content: Content,
        fetched_at: DateTime<Utc>,
        next_midnight: DateTime<Utc>,
        fresh_ttl: Duration,
        stale_grace: Duration,
    ) -> Self {
        let expires_at = (fetched_at + fresh_ttl).min(next_midnight).max(fetched_at);
        Self {
            content,
            version: 0,
            fetched_at,
            expires_at,
            stale_after: expires_at + stale_grace,
            is_fallback: false,
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content.content_id
    }

    pub fn date(&self) -> NaiveDate {
        self.content.date
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the entry may still be served as stale data.
    pub fn within_grace(&self, now: DateTime<Utc>) -> bool {
        now < self.stale_after
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn timestamps_ordered(&self) -> bool {
        self.fetched_at <= self.expires_at && self.expires_at <= self.stale_after
    }

    pub fn as_fallback(mut self) -> Self {
        self.is_fallback = true;
        self
    }
}

// ============================================================================
// Offline actions
// ============================================================================

/// What a queued action will do when connectivity returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Re-fetch content for a date
    ContentRefresh { date: NaiveDate },
    /// Server-side effect of a user interaction with an item
    UserInteractionSideEffect {
        content_id: String,
        interaction: String,
        occurred_at: DateTime<Utc>,
    },
    /// Opaque host-defined sync payload
    GenericSync {
        topic: String,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::ContentRefresh { .. } => "content_refresh",
            ActionKind::UserInteractionSideEffect { .. } => "user_interaction",
            ActionKind::GenericSync { .. } => "generic_sync",
        }
    }
}

/// An action recorded while offline, awaiting sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: Uuid,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingAction {
    pub fn new(kind: ActionKind, enqueued_at: DateTime<Utc>, max_retries: u32) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            kind,
            enqueued_at,
            retry_count: 0,
            max_retries,
            last_error: None,
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns `false` once the action has exhausted its retries and must be
    /// dropped.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.retry_count <= self.max_retries
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.enqueued_at
    }
}

// ============================================================================
// Scheduler state
// ============================================================================

/// Persisted refresh-timer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_refresh_at: DateTime<Utc>,
    pub last_timezone_offset_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_name: Option<String>,
    pub last_checked_at: DateTime<Utc>,
}

/// Convert a configured `std` duration into a chrono span.
///
/// Durations too large for chrono saturate at roughly a century.
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(36_500))
}
