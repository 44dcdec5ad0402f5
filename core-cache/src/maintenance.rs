//! Selective cleanup of expired history and aged offline actions.

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{CacheSettings, QueueSettings};
use core_runtime::events::{EngineEvent, EventBus, HealthEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::content_store::{ContentStore, InvalidationOutcome};
use crate::models::to_chrono;
use crate::error::Result;
use crate::offline_queue::OfflineQueue;

/// Result of a cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub history_entries_removed: usize,
    pub queue_items_removed: usize,
    pub bytes_freed: u64,
    pub ran_at: Option<DateTime<Utc>>,
}

impl CleanupStats {
    pub fn items_removed(&self) -> usize {
        self.history_entries_removed + self.queue_items_removed
    }
}

pub struct MaintenanceService {
    content: Arc<ContentStore>,
    queue: OfflineQueue,
    clock: Arc<dyn Clock>,
    history_retention: Duration,
    max_action_age: Duration,
    events: Option<EventBus>,
}

impl MaintenanceService {
    pub fn new(
        content: Arc<ContentStore>,
        queue: OfflineQueue,
        clock: Arc<dyn Clock>,
        cache: &CacheSettings,
        queue_settings: &QueueSettings,
    ) -> Self {
        Self {
            content,
            queue,
            clock,
            history_retention: cache.history_retention(),
            max_action_age: queue_settings.max_action_age(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Remove history past retention and actions past their maximum age.
    ///
    /// The current entry and fresh history are never touched.
    #[instrument(skip(self))]
    pub async fn selective_cleanup(&self) -> Result<CleanupStats> {
        let now = self.clock.now();
        let cutoff = now - to_chrono(self.history_retention);

        let (history_removed, history_bytes) = self.content.prune_history(cutoff).await?;
        let (queue_removed, queue_bytes) = self.queue.remove_older_than(self.max_action_age).await?;

        let stats = CleanupStats {
            history_entries_removed: history_removed,
            queue_items_removed: queue_removed,
            bytes_freed: history_bytes + queue_bytes,
            ran_at: Some(now),
        };

        if stats.items_removed() > 0 {
            info!(
                history_entries_removed = stats.history_entries_removed,
                queue_items_removed = stats.queue_items_removed,
                bytes_freed = stats.bytes_freed,
                "Maintenance cleanup completed"
            );
        } else {
            debug!("Maintenance cleanup found nothing to remove");
        }

        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Health(HealthEvent::MaintenanceCompleted {
                items_removed: stats.items_removed(),
                bytes_freed: stats.bytes_freed,
            }));
        }
        Ok(stats)
    }

    /// Bump the cache version so the next read refetches.
    pub async fn invalidate_cache(&self, reason: &str) -> Result<InvalidationOutcome> {
        self.content.invalidate(reason, true).await
    }

    /// Run [`selective_cleanup`](Self::selective_cleanup) every `interval`
    /// until `token` is cancelled.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.selective_cleanup().await {
                            warn!(error = %error, "Periodic cleanup failed");
                        }
                    }
                }
            }
            debug!("Periodic maintenance stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use crate::persistence::PersistentStore;
    use bridge_desktop::MemoryKeyValueStore;
    use bridge_traits::content::{Content, ContentPayload};
    use bridge_traits::time::ManualClock;
    use chrono::{NaiveDate, TimeZone};

    struct Fixture {
        clock: Arc<ManualClock>,
        content: Arc<ContentStore>,
        queue: OfflineQueue,
        service: MaintenanceService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ));
        let persistence = PersistentStore::new(Arc::new(MemoryKeyValueStore::new()));
        let cache = CacheSettings::default();
        let queue_settings = QueueSettings::default();

        let content = Arc::new(ContentStore::new(persistence.clone(), clock.clone(), cache.clone()));
        let queue = OfflineQueue::new(persistence, clock.clone(), queue_settings.clone());
        let service = MaintenanceService::new(
            content.clone(),
            queue.clone(),
            clock.clone(),
            &cache,
            &queue_settings,
        );
        Fixture {
            clock,
            content,
            queue,
            service,
        }
    }

    fn item(id: &str, day: u32) -> Content {
        Content::new(
            id,
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            ContentPayload {
                title: id.into(),
                summary: String::new(),
                body: String::new(),
                topic: None,
                reading_minutes: None,
            },
        )
    }

    async fn put_on(f: &Fixture, id: &str, day: u32) {
        f.clock
            .set(Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap());
        let midnight = Utc.with_ymd_and_hms(2024, 3, day + 1, 0, 0, 0).unwrap();
        f.content
            .put(f.content.entry_for(item(id, day), midnight))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_history_and_old_actions() {
        let f = fixture();
        f.queue
            .enqueue(ActionKind::GenericSync {
                topic: "old".into(),
                fields: Default::default(),
            })
            .await
            .unwrap();

        put_on(&f, "d1", 1).await;
        put_on(&f, "d2", 2).await;
        put_on(&f, "d20", 20).await;

        let stats = f.service.selective_cleanup().await.unwrap();
        assert_eq!(stats.history_entries_removed, 2);
        assert_eq!(stats.queue_items_removed, 1);
        assert!(stats.bytes_freed > 0);

        // Current entry is untouched
        assert_eq!(f.content.last_known().await.unwrap().content_id(), "d20");
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_history() {
        let f = fixture();
        put_on(&f, "d1", 1).await;
        put_on(&f, "d2", 2).await;

        let stats = f.service.selective_cleanup().await.unwrap();
        assert_eq!(stats.items_removed(), 0);
        assert_eq!(f.content.stats().await.history_len, 1);
    }

    #[tokio::test]
    async fn test_invalidate_cache_bumps_version() {
        let f = fixture();
        put_on(&f, "d1", 1).await;

        let outcome = f.service.invalidate_cache("user request").await.unwrap();
        assert_eq!(outcome.version, 1);
        assert!(f.content.get(false).await.is_none());
    }

    #[tokio::test]
    async fn test_periodic_cleanup_stops_on_cancel() {
        let f = fixture();
        let token = CancellationToken::new();
        let handle = Arc::new(f.service).spawn_periodic(Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
