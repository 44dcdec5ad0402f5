//! # Content Store
//!
//! Holds the current cache entry, a bounded per-date history, and the
//! monotonic cache version used for invalidation.
//!
//! ## Freshness
//!
//! An entry is served by `get(false)` only while it is within its fresh window
//! **and** stored under the current cache version. `get(true)` additionally
//! serves entries that are expired or version-outdated but still inside their
//! stale grace window.
//!
//! ## Atomicity
//!
//! Mutations are written to the key-value store before the in-memory state is
//! swapped, all under the state write lock. Concurrent readers observe either
//! the previous or the new state, never a partial one.

use bridge_traits::{content::Content, time::Clock};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_runtime::config::CacheSettings;
use core_runtime::events::{ContentEvent, EngineEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::{to_chrono, CacheEntry};
use crate::persistence::{encoded_size, keys, PersistentStore};

#[derive(Debug, Default, Clone)]
struct StoreState {
    current: Option<CacheEntry>,
    history: BTreeMap<NaiveDate, CacheEntry>,
    version: u64,
}

/// Result of an invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationOutcome {
    /// Cache version after the invalidation
    pub version: u64,
    pub version_bumped: bool,
    /// Whether the current entry was deleted
    pub entry_removed: bool,
}

/// Point-in-time content store statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStats {
    pub has_current: bool,
    pub store_version: u64,
    pub current_version: Option<u64>,
    pub current_date: Option<NaiveDate>,
    pub current_age_secs: Option<i64>,
    pub is_fresh: bool,
    pub is_servable_stale: bool,
    pub history_len: usize,
    pub approx_bytes: u64,
}

/// Consistent copy of the store used by integrity checks
#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub current: Option<CacheEntry>,
    pub history: Vec<CacheEntry>,
    pub version: u64,
}

/// Lazy iterator over cached history, newest first.
///
/// The iterator walks a snapshot taken when [`ContentStore::history`] was
/// called. It is finite and can be restarted with [`HistoryIter::restart`] or
/// by cloning before iteration.
#[derive(Debug, Clone)]
pub struct HistoryIter {
    entries: Arc<Vec<CacheEntry>>,
    cutoff: NaiveDate,
    position: usize,
}

impl HistoryIter {
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for HistoryIter {
    type Item = CacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.entries.get(self.position) {
            self.position += 1;
            if entry.date() >= self.cutoff {
                return Some(entry.clone());
            }
            // Entries are ordered newest first, nothing older can qualify
            self.position = self.entries.len();
        }
        None
    }
}

/// Durable store for the daily content item.
pub struct ContentStore {
    persistence: PersistentStore,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    events: Option<EventBus>,
    state: RwLock<StoreState>,
}

impl ContentStore {
    pub fn new(persistence: PersistentStore, clock: Arc<dyn Clock>, settings: CacheSettings) -> Self {
        Self {
            persistence,
            clock,
            settings,
            events: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Restore state from the key-value store.
    ///
    /// Corrupt values are discarded and logged; the store then starts empty
    /// for that part of its state.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<()> {
        let current: Option<CacheEntry> = self.persistence.load_optional(keys::CURRENT_ENTRY).await?;
        let history: Vec<CacheEntry> = self.persistence.load_or_default(keys::HISTORY).await?;
        let version: u64 = self.persistence.load_or_default(keys::CACHE_VERSION).await?;

        let mut state = self.state.write().await;
        state.current = current;
        state.history = history.into_iter().map(|e| (e.date(), e)).collect();
        state.version = version;

        info!(
            has_current = state.current.is_some(),
            history_len = state.history.len(),
            version = state.version,
            "Content store restored"
        );
        Ok(())
    }

    /// Build a fresh entry for newly fetched content.
    pub fn entry_for(&self, content: Content, next_midnight: DateTime<Utc>) -> CacheEntry {
        CacheEntry::from_fetch(
            content,
            self.clock.now(),
            next_midnight,
            to_chrono(self.settings.fresh_ttl()),
            to_chrono(self.settings.stale_grace()),
        )
    }

    /// Return the current entry if it is servable.
    ///
    /// With `allow_stale == false` only fresh, version-current entries are
    /// returned. With `allow_stale == true` entries inside the stale grace
    /// window are returned as well.
    pub async fn get(&self, allow_stale: bool) -> Option<CacheEntry> {
        let state = self.state.read().await;
        let entry = state.current.as_ref()?;
        let now = self.clock.now();

        let version_current = entry.version >= state.version;
        if version_current && !entry.is_expired(now) {
            return Some(entry.clone());
        }
        if allow_stale && entry.within_grace(now) {
            debug!(content_id = %entry.content_id(), "Serving stale entry");
            return Some(entry.clone());
        }
        None
    }

    /// Current entry regardless of freshness.
    pub async fn last_known(&self) -> Option<CacheEntry> {
        self.state.read().await.current.clone()
    }

    /// Replace the current entry.
    ///
    /// The entry is stamped with the current cache version. A previous entry
    /// for a different date moves into history.
    #[instrument(skip(self, entry), fields(content_id = %entry.content_id(), date = %entry.date()))]
    pub async fn put(&self, mut entry: CacheEntry) -> Result<CacheEntry> {
        let mut state = self.state.write().await;
        let mut next = state.clone();

        entry.version = next.version;
        entry.is_fallback = false;
        if !entry.timestamps_ordered() {
            warn!("Entry timestamps out of order, clamping");
            entry.expires_at = entry.expires_at.max(entry.fetched_at);
            entry.stale_after = entry.stale_after.max(entry.expires_at);
        }

        next.history.remove(&entry.date());
        if let Some(previous) = next.current.take() {
            if previous.date() != entry.date() {
                next.history.insert(previous.date(), previous);
            }
        }
        while next.history.len() > self.settings.max_history_days {
            let Some(oldest) = next.history.keys().next().copied() else {
                break;
            };
            next.history.remove(&oldest);
        }
        next.current = Some(entry.clone());

        self.persistence.save(keys::CURRENT_ENTRY, &entry).await?;
        self.save_history(&next).await?;
        *state = next;

        info!(version = entry.version, "Content cached");
        self.emit(ContentEvent::Refreshed {
            content_id: entry.content_id().to_string(),
            date: entry.date().to_string(),
            version: entry.version,
        });
        Ok(entry)
    }

    /// Invalidate the cache.
    ///
    /// With `bump_version` the cache version is incremented and the current
    /// entry is kept as a stale fallback; `get(false)` returns `None` until the
    /// next `put`. Without it the current entry is deleted.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, reason: &str, bump_version: bool) -> Result<InvalidationOutcome> {
        let mut state = self.state.write().await;

        let outcome = if bump_version {
            let version = state.version.saturating_add(1);
            self.persistence.save(keys::CACHE_VERSION, &version).await?;
            state.version = version;
            InvalidationOutcome {
                version,
                version_bumped: true,
                entry_removed: false,
            }
        } else {
            let removed = state.current.is_some();
            self.persistence.remove(keys::CURRENT_ENTRY).await?;
            state.current = None;
            InvalidationOutcome {
                version: state.version,
                version_bumped: false,
                entry_removed: removed,
            }
        };

        info!(
            reason,
            version = outcome.version,
            version_bumped = outcome.version_bumped,
            "Cache invalidated"
        );
        self.emit(ContentEvent::Invalidated {
            reason: reason.to_string(),
            version: outcome.version,
            version_bumped: outcome.version_bumped,
        });
        Ok(outcome)
    }

    /// Entries from the last `max_days` days, newest first, current included.
    pub async fn history(&self, max_days: u32) -> HistoryIter {
        let state = self.state.read().await;
        let mut entries: Vec<CacheEntry> = Vec::with_capacity(state.history.len() + 1);
        if let Some(current) = &state.current {
            entries.push(current.clone());
        }
        entries.extend(state.history.values().rev().cloned());

        let today = self.clock.now().date_naive();
        let cutoff = today
            .checked_sub_signed(Duration::days(i64::from(max_days)))
            .unwrap_or(NaiveDate::MIN);

        HistoryIter {
            entries: Arc::new(entries),
            cutoff,
            position: 0,
        }
    }

    /// Remove history entries whose stale window closed before `cutoff`.
    ///
    /// Returns the number of removed entries and their approximate size.
    pub async fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<(usize, u64)> {
        self.retain_history(|_, entry| entry.stale_after >= cutoff).await
    }

    /// Keep only the `keep` newest history entries.
    pub async fn trim_history(&self, keep: usize) -> Result<(usize, u64)> {
        let keep_from = {
            let state = self.state.read().await;
            state.history.keys().rev().nth(keep.saturating_sub(1)).copied()
        };
        match keep_from {
            Some(oldest_kept) if keep > 0 => {
                self.retain_history(|date, _| *date >= oldest_kept).await
            }
            _ if keep == 0 => self.retain_history(|_, _| false).await,
            _ => Ok((0, 0)),
        }
    }

    async fn retain_history<F>(&self, mut keep: F) -> Result<(usize, u64)>
    where
        F: FnMut(&NaiveDate, &CacheEntry) -> bool,
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();

        let mut removed = 0usize;
        let mut bytes = 0u64;
        next.history.retain(|date, entry| {
            let retain = keep(date, entry);
            if !retain {
                removed += 1;
                bytes += encoded_size(entry);
            }
            retain
        });

        if removed > 0 {
            self.save_history(&next).await?;
            *state = next;
            debug!(removed, bytes, "History pruned");
        }
        Ok((removed, bytes))
    }

    /// Drop history entries that conflict with the current entry or carry
    /// disordered timestamps. Returns the number of entries removed.
    pub async fn repair(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let mut repaired = 0usize;

        if let Some(current) = next.current.as_mut() {
            if next.history.remove(&current.date()).is_some() {
                repaired += 1;
            }
            if !current.timestamps_ordered() {
                current.expires_at = current.expires_at.max(current.fetched_at);
                current.stale_after = current.stale_after.max(current.expires_at);
                repaired += 1;
            }
            if current.version > next.version {
                current.version = next.version;
                repaired += 1;
            }
        }
        let before = next.history.len();
        next.history.retain(|date, entry| *date == entry.date() && entry.timestamps_ordered());
        repaired += before - next.history.len();

        if repaired > 0 {
            match &next.current {
                Some(current) => {
                    self.persistence.save(keys::CURRENT_ENTRY, current).await?;
                }
                None => self.persistence.remove(keys::CURRENT_ENTRY).await?,
            }
            self.save_history(&next).await?;
            *state = next;
            warn!(repaired, "Content store repaired");
        }
        Ok(repaired)
    }

    pub async fn snapshot(&self) -> ContentSnapshot {
        let state = self.state.read().await;
        ContentSnapshot {
            current: state.current.clone(),
            history: state.history.values().cloned().collect(),
            version: state.version,
        }
    }

    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    pub async fn stats(&self) -> ContentStats {
        let state = self.state.read().await;
        let now = self.clock.now();
        let current = state.current.as_ref();

        let is_fresh = current
            .map(|e| e.version >= state.version && !e.is_expired(now))
            .unwrap_or(false);
        let approx_bytes = current.map(encoded_size).unwrap_or(0)
            + state.history.values().map(encoded_size).sum::<u64>();

        ContentStats {
            has_current: current.is_some(),
            store_version: state.version,
            current_version: current.map(|e| e.version),
            current_date: current.map(CacheEntry::date),
            current_age_secs: current.map(|e| e.age(now).num_seconds()),
            is_fresh,
            is_servable_stale: current.map(|e| e.within_grace(now)).unwrap_or(false),
            history_len: state.history.len(),
            approx_bytes,
        }
    }

    async fn save_history(&self, state: &StoreState) -> Result<()> {
        let history: Vec<&CacheEntry> = state.history.values().collect();
        self.persistence.save(keys::HISTORY, &history).await?;
        Ok(())
    }

    fn emit(&self, event: ContentEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Content(event));
        }
    }
}
