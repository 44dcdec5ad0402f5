//! # Offline Queue
//!
//! Durable FIFO of actions recorded while offline.
//!
//! ## Semantics
//!
//! - Capacity is bounded; enqueueing into a full queue evicts the oldest
//!   action and reports the overflow.
//! - A `ContentRefresh` for a date that is already queued is coalesced.
//! - Draining replays actions in enqueue order through an [`ActionSyncer`].
//!   Successful actions are removed; failures increment `retry_count` and the
//!   action is dropped once `retry_count > max_retries`.
//! - At most one drain runs at a time. Concurrent callers share the in-flight
//!   drain and receive the same [`DrainReport`].
//!
//! Every mutation is persisted before the in-memory queue is updated.

use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::QueueSettings;
use core_runtime::events::{EngineEvent, EventBus, QueueEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::to_chrono;
use crate::error::{CacheError, Result};
use crate::models::{ActionKind, PendingAction};
use crate::persistence::{encoded_size, keys, PersistentStore};

/// Replays a queued action against the remote system.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ActionSyncer: Send + Sync {
    async fn sync(&self, action: &PendingAction) -> Result<()>;
}

/// Outcome of an enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Identifier of the queued action, or of the existing action it was
    /// coalesced into
    pub action_id: Uuid,
    pub coalesced: bool,
    /// Action evicted to make room
    pub evicted: Option<PendingAction>,
    pub pending: usize,
}

/// Outcome of a drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub synced: usize,
    /// Failed attempts that remain queued for retry
    pub failed: usize,
    /// Actions dropped after exhausting their retries
    pub dropped: Vec<Uuid>,
    /// Queue length after the cycle
    pub pending: usize,
    /// Persistence errors hit during the cycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.synced + self.failed + self.dropped.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.dropped.is_empty() && self.errors.is_empty()
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub capacity: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub total_retries: u32,
    /// Consecutive drain cycles that ended with failures
    pub consecutive_failed_cycles: u32,
    pub draining: bool,
    pub approx_bytes: u64,
}

impl QueueStats {
    /// Fraction of capacity in use, `0.0..=1.0`.
    pub fn backlog_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.pending as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }
}

type InFlightDrain = Shared<BoxFuture<'static, DrainReport>>;

struct QueueInner {
    persistence: PersistentStore,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
    events: Option<EventBus>,
    actions: Mutex<VecDeque<PendingAction>>,
    in_flight: Mutex<Option<InFlightDrain>>,
    consecutive_failed_cycles: AtomicU32,
}

/// Durable bounded FIFO of pending offline actions.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl OfflineQueue {
    pub fn new(persistence: PersistentStore, clock: Arc<dyn Clock>, settings: QueueSettings) -> Self {
        Self::build(persistence, clock, settings, None)
    }

    pub fn with_events(
        persistence: PersistentStore,
        clock: Arc<dyn Clock>,
        settings: QueueSettings,
        events: EventBus,
    ) -> Self {
        Self::build(persistence, clock, settings, Some(events))
    }

    fn build(
        persistence: PersistentStore,
        clock: Arc<dyn Clock>,
        settings: QueueSettings,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                persistence,
                clock,
                settings,
                events,
                actions: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(None),
                consecutive_failed_cycles: AtomicU32::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.settings.max_pending
    }

    /// Restore the queue from the key-value store.
    ///
    /// Actions beyond capacity are discarded oldest first.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let mut restored: VecDeque<PendingAction> = self
            .inner
            .persistence
            .load_or_default::<Vec<PendingAction>>(keys::PENDING_ACTIONS)
            .await?
            .into();

        while restored.len() > self.capacity() {
            if let Some(evicted) = restored.pop_front() {
                warn!(action_id = %evicted.action_id, "Discarding restored action beyond capacity");
            }
        }

        let mut actions = self.inner.actions.lock().await;
        *actions = restored;
        info!(pending = actions.len(), "Offline queue restored");
        Ok(actions.len())
    }

    /// Queue a new action.
    pub async fn enqueue(&self, kind: ActionKind) -> Result<EnqueueOutcome> {
        let action = PendingAction::new(kind, self.inner.clock.now(), self.inner.settings.max_retries);
        self.enqueue_action(action).await
    }

    /// Queue a prebuilt action.
    #[instrument(skip(self, action), fields(action_id = %action.action_id, kind = action.kind.label()))]
    pub async fn enqueue_action(&self, action: PendingAction) -> Result<EnqueueOutcome> {
        let mut actions = self.inner.actions.lock().await;

        if let ActionKind::ContentRefresh { date } = &action.kind {
            let existing = actions.iter().find(|queued| {
                matches!(&queued.kind, ActionKind::ContentRefresh { date: d } if d == date)
            });
            if let Some(existing) = existing {
                debug!(existing_id = %existing.action_id, "Coalescing duplicate content refresh");
                return Ok(EnqueueOutcome {
                    action_id: existing.action_id,
                    coalesced: true,
                    evicted: None,
                    pending: actions.len(),
                });
            }
        }

        let mut next = actions.clone();
        let mut evicted = None;
        while next.len() >= self.capacity() {
            match next.pop_front() {
                Some(oldest) => evicted = Some(oldest),
                None => break,
            }
        }
        let action_id = action.action_id;
        let kind = action.kind.label();
        next.push_back(action);

        self.inner.commit(&mut actions, next).await?;
        let pending = actions.len();

        info!(action_id = %action_id, kind, pending, "Enqueuing offline action");
        if let Some(evicted) = &evicted {
            let overflow = CacheError::QueueOverflow {
                capacity: self.capacity(),
                evicted_action_id: evicted.action_id.to_string(),
            };
            warn!(error = %overflow, "Offline queue overflow");
            self.inner.emit(QueueEvent::Overflow {
                evicted_action_id: evicted.action_id.to_string(),
            });
        }
        self.inner.emit(QueueEvent::Enqueued {
            action_id: action_id.to_string(),
            kind: kind.to_string(),
            pending,
        });

        Ok(EnqueueOutcome {
            action_id,
            coalesced: false,
            evicted,
            pending,
        })
    }

    /// Replay queued actions in order.
    ///
    /// When a drain is already running, this call joins it instead of
    /// starting a second one.
    pub async fn drain(&self, syncer: Arc<dyn ActionSyncer>) -> DrainReport {
        let drain = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight drain");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let drain = async move { inner.run_drain(syncer).await }.boxed().shared();
                    *slot = Some(drain.clone());
                    drain
                }
            }
        };

        let report = drain.clone().await;

        let mut slot = self.inner.in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&drain)) {
            *slot = None;
        }
        report
    }

    pub async fn is_draining(&self) -> bool {
        self.inner.in_flight.lock().await.is_some()
    }

    /// Delay before the next automatic drain attempt.
    pub fn next_retry_delay(&self) -> Duration {
        self.inner
            .settings
            .retry
            .delay_for(self.inner.consecutive_failed_cycles.load(Ordering::SeqCst))
    }

    pub async fn len(&self) -> usize {
        self.inner.actions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.actions.lock().await.is_empty()
    }

    /// Copy of the queued actions in order.
    pub async fn peek_all(&self) -> Vec<PendingAction> {
        self.inner.actions.lock().await.iter().cloned().collect()
    }

    /// Remove every action. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut actions = self.inner.actions.lock().await;
        let removed = actions.len();
        self.inner.commit(&mut actions, VecDeque::new()).await?;
        info!(removed, "Offline queue cleared");
        Ok(removed)
    }

    /// Remove actions older than `max_age`.
    ///
    /// Returns the number removed and their approximate size.
    pub async fn remove_older_than(&self, max_age: Duration) -> Result<(usize, u64)> {
        let now = self.inner.clock.now();
        let max_age = to_chrono(max_age);
        self.retain(|action| action.age(now) <= max_age).await
    }

    /// Keep only the `keep` newest actions.
    pub async fn trim_to(&self, keep: usize) -> Result<(usize, u64)> {
        let len = self.len().await;
        let drop_count = len.saturating_sub(keep);
        let mut index = 0usize;
        self.retain(|_| {
            index += 1;
            index > drop_count
        })
        .await
    }

    /// Drop actions that violate queue invariants. Returns the number removed.
    pub async fn repair(&self) -> Result<usize> {
        let (over_retried, _) = self
            .retain(|action| action.retry_count <= action.max_retries)
            .await?;
        let (over_capacity, _) = self.trim_to(self.capacity()).await?;
        Ok(over_retried + over_capacity)
    }

    async fn retain<F>(&self, mut keep: F) -> Result<(usize, u64)>
    where
        F: FnMut(&PendingAction) -> bool,
    {
        let mut actions = self.inner.actions.lock().await;
        let mut removed = 0usize;
        let mut bytes = 0u64;
        let next: VecDeque<PendingAction> = actions
            .iter()
            .filter(|action| {
                let retain = keep(action);
                if !retain {
                    removed += 1;
                    bytes += encoded_size(*action);
                }
                retain
            })
            .cloned()
            .collect();

        if removed > 0 {
            self.inner.commit(&mut actions, next).await?;
            debug!(removed, bytes, "Removed offline actions");
        }
        Ok((removed, bytes))
    }

    pub async fn stats(&self) -> QueueStats {
        let draining = self.is_draining().await;
        let actions = self.inner.actions.lock().await;
        QueueStats {
            pending: actions.len(),
            capacity: self.capacity(),
            oldest_enqueued_at: actions.front().map(|a| a.enqueued_at),
            total_retries: actions.iter().map(|a| a.retry_count).sum(),
            consecutive_failed_cycles: self.inner.consecutive_failed_cycles.load(Ordering::SeqCst),
            draining,
            approx_bytes: actions.iter().map(encoded_size).sum(),
        }
    }
}

impl QueueInner {
    async fn commit(
        &self,
        actions: &mut VecDeque<PendingAction>,
        next: VecDeque<PendingAction>,
    ) -> Result<()> {
        self.persistence
            .save(keys::PENDING_ACTIONS, &next.iter().collect::<Vec<_>>())
            .await?;
        *actions = next;
        Ok(())
    }

    async fn run_drain(self: Arc<Self>, syncer: Arc<dyn ActionSyncer>) -> DrainReport {
        let snapshot: Vec<PendingAction> = self.actions.lock().await.iter().cloned().collect();
        let mut report = DrainReport::default();

        if !snapshot.is_empty() {
            info!(pending = snapshot.len(), "Draining offline queue");
        }

        for action in snapshot {
            let result = syncer.sync(&action).await;
            let mut actions = self.actions.lock().await;
            let Some(position) = actions.iter().position(|a| a.action_id == action.action_id) else {
                // Evicted or cleared while syncing
                continue;
            };

            let mut next = actions.clone();
            match result {
                Ok(()) => {
                    next.remove(position);
                    debug!(action_id = %action.action_id, "Action synced");
                    report.synced += 1;
                }
                Err(error) => {
                    let keep = next
                        .get_mut(position)
                        .map(|queued| queued.fail(error.to_string()))
                        .unwrap_or(false);
                    let retry_count = next.get(position).map(|a| a.retry_count).unwrap_or(0);

                    if keep {
                        warn!(
                            action_id = %action.action_id,
                            retry_count,
                            error = %error,
                            "Action sync failed, will retry"
                        );
                        report.failed += 1;
                    } else {
                        next.remove(position);
                        let exhausted = CacheError::RetryExhausted {
                            action_id: action.action_id.to_string(),
                            retry_count,
                        };
                        warn!(error = %exhausted, "Dropping offline action");
                        self.emit(QueueEvent::ActionDropped {
                            action_id: action.action_id.to_string(),
                            retry_count,
                        });
                        report.dropped.push(action.action_id);
                    }
                }
            }

            if let Err(error) = self.commit(&mut actions, next).await {
                warn!(error = %error, "Failed to persist offline queue");
                report.errors.push(error.to_string());
            }
        }

        report.pending = self.actions.lock().await.len();
        if report.failed > 0 || !report.errors.is_empty() {
            self.consecutive_failed_cycles.fetch_add(1, Ordering::SeqCst);
        } else {
            self.consecutive_failed_cycles.store(0, Ordering::SeqCst);
        }

        if report.attempted() > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                dropped = report.dropped.len(),
                pending = report.pending,
                "Offline queue drained"
            );
            self.emit(QueueEvent::Drained {
                synced: report.synced,
                failed: report.failed,
                dropped: report.dropped.len(),
                pending: report.pending,
            });
        }
        report
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Queue(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::MemoryKeyValueStore;
    use bridge_traits::time::ManualClock;
    use chrono::{NaiveDate, TimeZone};
    use mockall::mock;
    use std::sync::Mutex as StdMutex;

    mock! {
        pub Syncer {}

        #[async_trait]
        impl ActionSyncer for Syncer {
            async fn sync(&self, action: &PendingAction) -> Result<()>;
        }
    }

    /// Records the order actions are replayed in.
    #[derive(Default)]
    struct RecordingSyncer {
        seen: StdMutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ActionSyncer for RecordingSyncer {
        async fn sync(&self, action: &PendingAction) -> Result<()> {
            self.seen.lock().unwrap().push(action.action_id);
            Ok(())
        }
    }

    /// Yields before succeeding so concurrent callers overlap.
    #[derive(Default)]
    struct SlowSyncer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionSyncer for SlowSyncer {
        async fn sync(&self, _action: &PendingAction) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    fn settings(max_pending: usize, max_retries: u32) -> QueueSettings {
        QueueSettings {
            max_pending,
            max_retries,
            ..QueueSettings::default()
        }
    }

    fn queue(settings: QueueSettings) -> (Arc<ManualClock>, Arc<MemoryKeyValueStore>, OfflineQueue) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap(),
        ));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = OfflineQueue::new(PersistentStore::new(kv.clone()), clock.clone(), settings);
        (clock, kv, queue)
    }

    fn generic(topic: &str) -> ActionKind {
        ActionKind::GenericSync {
            topic: topic.to_string(),
            fields: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest() {
        let (_, _, queue) = queue(settings(100, 3));

        let mut ids = Vec::new();
        for i in 0..101 {
            let outcome = queue.enqueue(generic(&format!("t{i}"))).await.unwrap();
            ids.push(outcome.action_id);
            if i < 100 {
                assert!(outcome.evicted.is_none());
            } else {
                assert_eq!(outcome.evicted.unwrap().action_id, ids[0]);
            }
        }

        let queued = queue.peek_all().await;
        assert_eq!(queued.len(), 100);
        assert_eq!(queued[0].action_id, ids[1]);
        assert_eq!(queued[99].action_id, ids[100]);
    }

    #[tokio::test]
    async fn test_duplicate_refresh_is_coalesced() {
        let (_, _, queue) = queue(settings(10, 3));
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

        let first = queue.enqueue(ActionKind::ContentRefresh { date }).await.unwrap();
        let second = queue.enqueue(ActionKind::ContentRefresh { date }).await.unwrap();

        assert!(second.coalesced);
        assert_eq!(second.action_id, first.action_id);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_drain_replays_in_enqueue_order() {
        let (_, _, queue) = queue(settings(10, 3));
        let mut ids = Vec::new();
        for topic in ["a", "b", "c"] {
            ids.push(queue.enqueue(generic(topic)).await.unwrap().action_id);
        }

        let syncer = Arc::new(RecordingSyncer::default());
        let report = queue.drain(syncer.clone()).await;

        assert_eq!(report.synced, 3);
        assert_eq!(report.pending, 0);
        assert_eq!(*syncer.seen.lock().unwrap(), ids);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_action_dropped_after_max_retries() {
        let (_, _, queue) = queue(settings(10, 2));
        let id = queue.enqueue(generic("a")).await.unwrap().action_id;

        let mut mock = MockSyncer::new();
        mock.expect_sync()
            .times(3)
            .returning(|_| Err(CacheError::SyncFailure("503".into())));
        let syncer: Arc<dyn ActionSyncer> = Arc::new(mock);

        let first = queue.drain(syncer.clone()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(queue.peek_all().await[0].retry_count, 1);

        let second = queue.drain(syncer.clone()).await;
        assert_eq!(second.failed, 1);

        let third = queue.drain(syncer).await;
        assert_eq!(third.dropped, vec![id]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_delay_grows_and_resets() {
        let policy = core_runtime::config::RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        let (_, _, queue) = queue(QueueSettings {
            retry: policy,
            ..settings(10, 10)
        });
        queue.enqueue(generic("a")).await.unwrap();

        let mut failing = MockSyncer::new();
        failing
            .expect_sync()
            .returning(|_| Err(CacheError::SyncFailure("offline".into())));
        let failing: Arc<dyn ActionSyncer> = Arc::new(failing);

        let mut previous = queue.next_retry_delay();
        assert_eq!(previous, Duration::ZERO);
        for _ in 0..6 {
            queue.drain(failing.clone()).await;
            let delay = queue.next_retry_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(1_000));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(1_000));

        queue.drain(Arc::new(RecordingSyncer::default())).await;
        assert_eq!(queue.next_retry_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_drains_share_one_cycle() {
        let (_, _, queue) = queue(settings(10, 3));
        queue.enqueue(generic("a")).await.unwrap();
        queue.enqueue(generic("b")).await.unwrap();

        let syncer = Arc::new(SlowSyncer::default());
        let (a, b) = tokio::join!(queue.drain(syncer.clone()), queue.drain(syncer.clone()));

        assert_eq!(a, b);
        assert_eq!(a.synced, 2);
        assert_eq!(syncer.calls.load(Ordering::SeqCst), 2);
        assert!(!queue.is_draining().await);
    }

    #[tokio::test]
    async fn test_queue_survives_reload() {
        let (clock, kv, queue) = queue(settings(10, 3));
        queue.enqueue(generic("a")).await.unwrap();
        queue.enqueue(generic("b")).await.unwrap();

        let restored = OfflineQueue::new(PersistentStore::new(kv), clock, settings(10, 3));
        assert_eq!(restored.load().await.unwrap(), 2);
        assert_eq!(restored.peek_all().await, queue.peek_all().await);
    }

    #[tokio::test]
    async fn test_remove_older_than() {
        let (clock, _, queue) = queue(settings(10, 3));
        queue.enqueue(generic("old")).await.unwrap();
        clock.advance(chrono::Duration::days(8));
        queue.enqueue(generic("new")).await.unwrap();

        let (removed, bytes) = queue
            .remove_older_than(Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(bytes > 0);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_trim_to_keeps_newest() {
        let (_, _, queue) = queue(settings(10, 3));
        for topic in ["a", "b", "c", "d"] {
            queue.enqueue(generic(topic)).await.unwrap();
        }

        let (removed, _) = queue.trim_to(2).await.unwrap();
        assert_eq!(removed, 2);
        let topics: Vec<_> = queue
            .peek_all()
            .await
            .into_iter()
            .map(|a| match a.kind {
                ActionKind::GenericSync { topic, .. } => topic,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(topics, vec!["c".to_string(), "d".to_string()]);
    }
}
