//! # Timezone-Aware Refresh Scheduler
//!
//! Computes the next local midnight and fires a refresh callback when it
//! arrives. The timer is measured against the injected [`Clock`], checked at
//! least once per timezone-check interval, so wall-clock jumps and test clocks
//! are honoured.
//!
//! After firing, the next refresh is computed from `max(now, fired_at)`, which
//! keeps refresh times monotonic across DST transitions: a 23-hour or 25-hour
//! day yields the true next local midnight instead of `previous + 24h`.
//!
//! Timezone lookups that fail fall back to UTC with a warning.

use bridge_traits::time::{Clock, TimezoneProvider};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, NaiveTime, Offset, Utc};
use core_runtime::config::SchedulerSettings;
use core_runtime::events::{EngineEvent, EventBus, SchedulerEvent};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{CacheError, Result};
use crate::models::ScheduleState;
use crate::persistence::{keys, PersistentStore};

/// Callback invoked when a scheduled refresh is due.
pub type DueCallback = Arc<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Next local midnight strictly after `now` in the given timezone.
///
/// The offset is re-evaluated at the candidate instant so that a DST change
/// between `now` and midnight is accounted for.
pub fn next_local_midnight(now: DateTime<Utc>, tz: &dyn TimezoneProvider) -> Result<DateTime<Utc>> {
    let offset_now = offset_at(tz, now)?;
    let local_date = (now + seconds(offset_now)).date_naive();
    let mut target_date = local_date
        .succ_opt()
        .ok_or_else(|| CacheError::TimezoneDetectionFailure("date out of range".to_string()))?;

    loop {
        let target = target_date.and_time(NaiveTime::MIN);
        let candidate = resolve_local(target, offset_now, tz)?;
        if candidate > now {
            return Ok(candidate);
        }
        target_date = target_date
            .succ_opt()
            .ok_or_else(|| CacheError::TimezoneDetectionFailure("date out of range".to_string()))?;
    }
}

fn resolve_local(
    local: NaiveDateTime,
    initial_offset: FixedOffset,
    tz: &dyn TimezoneProvider,
) -> Result<DateTime<Utc>> {
    let mut offset = initial_offset;
    let mut candidate = local.and_utc() - seconds(offset);
    // Two refinements settle any single offset change
    for _ in 0..2 {
        let actual = offset_at(tz, candidate)?;
        if actual == offset {
            break;
        }
        offset = actual;
        candidate = local.and_utc() - seconds(offset);
    }
    Ok(candidate)
}

fn offset_at(tz: &dyn TimezoneProvider, instant: DateTime<Utc>) -> Result<FixedOffset> {
    tz.offset_at(instant)
        .map_err(|e| CacheError::TimezoneDetectionFailure(e.to_string()))
}

fn seconds(offset: FixedOffset) -> Duration {
    Duration::seconds(i64::from(offset.local_minus_utc()))
}

fn offset_minutes(offset: FixedOffset) -> i32 {
    offset.local_minus_utc() / 60
}

/// UTC fallback used when the host timezone cannot be determined.
struct UtcFallback;

impl TimezoneProvider for UtcFallback {
    fn offset_at(&self, _instant: DateTime<Utc>) -> bridge_traits::error::Result<FixedOffset> {
        Ok(Utc.fix())
    }
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    timezone: Arc<dyn TimezoneProvider>,
    persistence: PersistentStore,
    settings: SchedulerSettings,
    events: Option<EventBus>,
    state: RwLock<Option<ScheduleState>>,
    on_due: Mutex<Option<DueCallback>>,
    timer: Mutex<Option<CancellationToken>>,
    watching: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

/// Schedules the daily refresh at local midnight.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        timezone: Arc<dyn TimezoneProvider>,
        persistence: PersistentStore,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self::build(clock, timezone, persistence, settings, shutdown, None)
    }

    pub fn with_events(
        clock: Arc<dyn Clock>,
        timezone: Arc<dyn TimezoneProvider>,
        persistence: PersistentStore,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
        events: EventBus,
    ) -> Self {
        Self::build(clock, timezone, persistence, settings, shutdown, Some(events))
    }

    fn build(
        clock: Arc<dyn Clock>,
        timezone: Arc<dyn TimezoneProvider>,
        persistence: PersistentStore,
        settings: SchedulerSettings,
        shutdown: CancellationToken,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                timezone,
                persistence,
                settings,
                events,
                state: RwLock::new(None),
                on_due: Mutex::new(None),
                timer: Mutex::new(None),
                watching: Mutex::new(None),
                shutdown,
            }),
        }
    }

    /// Restore persisted schedule state.
    pub async fn load(&self) -> Result<Option<ScheduleState>> {
        let restored: Option<ScheduleState> =
            self.inner.persistence.load_optional(keys::SCHEDULE_STATE).await?;
        *self.inner.state.write().await = restored.clone();
        Ok(restored)
    }

    /// Next local midnight from now using the live timezone, falling back to
    /// UTC when it cannot be read.
    pub fn next_local_midnight(&self) -> DateTime<Utc> {
        self.inner.next_midnight_from(self.inner.clock.now())
    }

    /// Compute and persist the next refresh time and arm the timer.
    ///
    /// Any previously armed timer is replaced.
    #[instrument(skip(self, on_due))]
    pub async fn schedule_next_refresh(&self, on_due: DueCallback) -> Result<ScheduleState> {
        *self.inner.on_due.lock().await = Some(on_due);
        let state = self.inner.store_next(self.inner.clock.now()).await?;
        self.inner.arm(state.next_refresh_at).await;
        Ok(state)
    }

    /// Re-read the timezone and recompute the schedule if it changed.
    ///
    /// Returns whether a change was detected.
    pub async fn recompute_if_timezone_changed(&self) -> Result<bool> {
        self.inner.recompute_if_timezone_changed().await
    }

    /// Start the periodic timezone check.
    pub async fn start_timezone_watch(&self) -> JoinHandle<()> {
        let token = self.inner.shutdown.child_token();
        if let Some(previous) = self.inner.watching.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        let interval = inner.settings.timezone_check_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(error) = inner.recompute_if_timezone_changed().await {
                            warn!(error = %error, "Timezone check failed");
                        }
                    }
                }
            }
            debug!("Timezone watch stopped");
        })
    }

    /// Stop the refresh timer and the timezone watch.
    pub async fn cancel(&self) {
        if let Some(token) = self.inner.timer.lock().await.take() {
            token.cancel();
        }
        if let Some(token) = self.inner.watching.lock().await.take() {
            token.cancel();
        }
    }

    pub async fn state(&self) -> Option<ScheduleState> {
        self.inner.state.read().await.clone()
    }

    pub async fn is_armed(&self) -> bool {
        self.inner
            .timer
            .lock()
            .await
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl SchedulerInner {
    fn current_offset(&self, at: DateTime<Utc>) -> FixedOffset {
        match offset_at(self.timezone.as_ref(), at) {
            Ok(offset) => offset,
            Err(error) => {
                warn!(error = %error, "Falling back to UTC");
                Utc.fix()
            }
        }
    }

    fn next_midnight_from(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        next_local_midnight(reference, self.timezone.as_ref())
            .or_else(|error| {
                warn!(error = %error, "Scheduling against UTC");
                next_local_midnight(reference, &UtcFallback)
            })
            .unwrap_or_else(|_| reference + Duration::days(1))
    }

    async fn store_next(&self, reference: DateTime<Utc>) -> Result<ScheduleState> {
        let now = self.clock.now();
        let offset = self.current_offset(now);
        let state = ScheduleState {
            next_refresh_at: self.next_midnight_from(reference),
            last_timezone_offset_minutes: offset_minutes(offset),
            timezone_name: self.timezone.zone_name(),
            last_checked_at: now,
        };

        self.persistence.save(keys::SCHEDULE_STATE, &state).await?;
        *self.state.write().await = Some(state.clone());

        info!(
            next_refresh_at = %state.next_refresh_at,
            offset_minutes = state.last_timezone_offset_minutes,
            "Refresh scheduled"
        );
        self.emit(SchedulerEvent::RefreshScheduled {
            next_refresh_at: state.next_refresh_at.timestamp(),
            offset_minutes: state.last_timezone_offset_minutes,
        });
        Ok(state)
    }

    async fn arm(self: &Arc<Self>, due: DateTime<Utc>) {
        if self.on_due.lock().await.is_none() {
            return;
        }
        let token = self.shutdown.child_token();
        if let Some(previous) = self.timer.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(run_timer(Arc::clone(self), due, token));
    }

    async fn recompute_if_timezone_changed(self: &Arc<Self>) -> Result<bool> {
        let now = self.clock.now();
        let offset = offset_minutes(self.current_offset(now));
        let zone = self.timezone.zone_name();

        let previous = self.state.read().await.clone();
        let Some(previous) = previous else {
            return Ok(false);
        };

        let changed =
            previous.last_timezone_offset_minutes != offset || previous.timezone_name != zone;
        if !changed {
            let mut refreshed = previous;
            refreshed.last_checked_at = now;
            *self.state.write().await = Some(refreshed);
            return Ok(false);
        }

        info!(
            previous_offset_minutes = previous.last_timezone_offset_minutes,
            offset_minutes = offset,
            "Timezone change detected"
        );
        self.emit(SchedulerEvent::TimezoneChanged {
            previous_offset_minutes: previous.last_timezone_offset_minutes,
            offset_minutes: offset,
        });

        let state = self.store_next(now).await?;
        self.arm(state.next_refresh_at).await;
        Ok(true)
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(bus) = &self.events {
            let _ = bus.emit(EngineEvent::Scheduler(event));
        }
    }
}

async fn run_timer(inner: Arc<SchedulerInner>, mut due: DateTime<Utc>, token: CancellationToken) {
    let tick = inner.settings.timezone_check_interval();

    loop {
        loop {
            let now = inner.clock.now();
            if now >= due {
                break;
            }
            let remaining = (due - now).to_std().unwrap_or_default().min(tick);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
        if token.is_cancelled() {
            return;
        }

        info!(fired_at = %due, "Scheduled refresh due");
        inner.emit(SchedulerEvent::RefreshDue {
            fired_at: due.timestamp(),
        });
        let callback = inner.on_due.lock().await.clone();
        if let Some(callback) = callback {
            callback(due).await;
        }
        if token.is_cancelled() {
            return;
        }

        let reference = inner.clock.now().max(due);
        match inner.store_next(reference).await {
            Ok(state) => due = state.next_refresh_at,
            Err(error) => {
                warn!(error = %error, "Failed to persist next refresh, retrying later");
                due = inner.next_midnight_from(reference);
            }
        }
    }
}
