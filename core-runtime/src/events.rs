//! # Event Bus System
//!
//! Provides an event-driven architecture for the daily content cache engine using
//! `tokio::sync::broadcast`. Engine components publish typed events; hosts and
//! diagnostics tooling subscribe without coupling to component internals.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies per engine component
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   emit    ┌───────────┐
//! │ Content Store ├──────────>│           │
//! └───────────────┘           │           │
//!                             │ EventBus  │
//! ┌───────────────┐   emit    │ (broadcast│   subscribe   ┌────────────┐
//! │ Offline Queue ├──────────>│  channel) ├──────────────>│ Subscriber │
//! └───────────────┘           │           │               └────────────┘
//!                             │           │
//! ┌───────────────┐   emit    │           │   subscribe   ┌────────────┐
//! │  Migration    ├──────────>│           ├──────────────>│ Subscriber │
//! └───────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust
//! use core_runtime::events::{EventBus, EngineEvent, QueueEvent};
//!
//! let event_bus = EventBus::new(100);
//! let event = EngineEvent::Queue(QueueEvent::Drained {
//!     synced: 3,
//!     failed: 0,
//!     dropped: 0,
//!     pending: 0,
//! });
//!
//! event_bus.emit(event).ok();
//! ```
//!
//! ### Subscribing to Events
//!
//! ```rust
//! use core_runtime::events::{EventBus, EngineEvent};
//! use tokio::sync::broadcast::error::RecvError;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! tokio::spawn(async move {
//!     loop {
//!         match stream.recv().await {
//!             Ok(event) => println!("Received: {:?}", event),
//!             Err(RecvError::Lagged(n)) => {
//!                 eprintln!("Missed {} events", n);
//!             }
//!             Err(RecvError::Closed) => break,
//!         }
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error; engine components ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Engine Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// Content store and refresh events
    Content(ContentEvent),
    /// Offline queue events
    Queue(QueueEvent),
    /// Refresh scheduler events
    Scheduler(SchedulerEvent),
    /// Migration and rollout events
    Migration(MigrationEvent),
    /// Health, integrity and maintenance events
    Health(HealthEvent),
}

impl EngineEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            EngineEvent::Content(e) => e.description(),
            EngineEvent::Queue(e) => e.description(),
            EngineEvent::Scheduler(e) => e.description(),
            EngineEvent::Migration(e) => e.description(),
            EngineEvent::Health(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            EngineEvent::Migration(MigrationEvent::RolledBack { .. }) => EventSeverity::Error,
            EngineEvent::Health(HealthEvent::IntegrityFailed { .. }) => EventSeverity::Error,
            EngineEvent::Queue(QueueEvent::ActionDropped { .. }) => EventSeverity::Warning,
            EngineEvent::Queue(QueueEvent::Overflow { .. }) => EventSeverity::Warning,
            EngineEvent::Content(ContentEvent::FetchFailed { .. }) => EventSeverity::Warning,
            EngineEvent::Migration(MigrationEvent::CompatibilityForced { .. }) => {
                EventSeverity::Warning
            }
            EngineEvent::Content(ContentEvent::Refreshed { .. }) => EventSeverity::Info,
            EngineEvent::Queue(QueueEvent::Drained { .. }) => EventSeverity::Info,
            EngineEvent::Migration(MigrationEvent::PhaseAdvanced { .. }) => EventSeverity::Info,
            EngineEvent::Scheduler(SchedulerEvent::TimezoneChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Content Events
// ============================================================================

/// Events related to today's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ContentEvent {
    /// Fresh content fetched and stored.
    Refreshed {
        content_id: String,
        /// Calendar date (YYYY-MM-DD)
        date: String,
        version: u64,
    },
    /// Content served past its hard expiry.
    ServedStale { content_id: String },
    /// Last-known content served because nothing better was available.
    ServedFallback { content_id: String },
    /// Cache invalidated.
    Invalidated {
        reason: String,
        /// Store version after invalidation
        version: u64,
        version_bumped: bool,
    },
    /// Remote fetch failed; callers were served cached data.
    FetchFailed { message: String, offline: bool },
}

impl ContentEvent {
    fn description(&self) -> &str {
        match self {
            ContentEvent::Refreshed { .. } => "Content refreshed",
            ContentEvent::ServedStale { .. } => "Stale content served",
            ContentEvent::ServedFallback { .. } => "Fallback content served",
            ContentEvent::Invalidated { .. } => "Cache invalidated",
            ContentEvent::FetchFailed { .. } => "Content fetch failed",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events related to the offline action queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// Action appended to the queue.
    Enqueued {
        action_id: String,
        kind: String,
        pending: usize,
    },
    /// Queue was full; the oldest action was evicted.
    Overflow { evicted_action_id: String },
    /// Action exceeded its retry budget and was dropped.
    ActionDropped {
        action_id: String,
        retry_count: u32,
    },
    /// Drain cycle finished.
    Drained {
        synced: usize,
        failed: usize,
        dropped: usize,
        pending: usize,
    },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Enqueued { .. } => "Action queued",
            QueueEvent::Overflow { .. } => "Queue overflow, oldest action evicted",
            QueueEvent::ActionDropped { .. } => "Action dropped after retries",
            QueueEvent::Drained { .. } => "Queue drained",
        }
    }
}

// ============================================================================
// Scheduler Events
// ============================================================================

/// Events related to the midnight refresh scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SchedulerEvent {
    /// Next refresh armed.
    RefreshScheduled {
        /// Unix epoch seconds
        next_refresh_at: i64,
        offset_minutes: i32,
    },
    /// Refresh timer fired.
    RefreshDue { fired_at: i64 },
    /// Local UTC offset changed; the timer was re-armed.
    TimezoneChanged {
        previous_offset_minutes: i32,
        offset_minutes: i32,
    },
}

impl SchedulerEvent {
    fn description(&self) -> &str {
        match self {
            SchedulerEvent::RefreshScheduled { .. } => "Refresh scheduled",
            SchedulerEvent::RefreshDue { .. } => "Scheduled refresh due",
            SchedulerEvent::TimezoneChanged { .. } => "Timezone changed",
        }
    }
}

// ============================================================================
// Migration Events
// ============================================================================

/// Events related to the migration state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum MigrationEvent {
    /// Phase advanced one step.
    PhaseAdvanced { from: String, to: String },
    /// Rollout strategy or percentage changed.
    RolloutChanged { strategy: String, percentage: u8 },
    /// Compatibility path forced.
    CompatibilityForced { reason: String },
    /// Rollback executed.
    RolledBack {
        reason: String,
        level: String,
        automatic: bool,
    },
}

impl MigrationEvent {
    fn description(&self) -> &str {
        match self {
            MigrationEvent::PhaseAdvanced { .. } => "Migration phase advanced",
            MigrationEvent::RolloutChanged { .. } => "Rollout changed",
            MigrationEvent::CompatibilityForced { .. } => "Compatibility mode forced",
            MigrationEvent::RolledBack { .. } => "Migration rolled back",
        }
    }
}

// ============================================================================
// Health Events
// ============================================================================

/// Events related to health, integrity and maintenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum HealthEvent {
    /// Integrity check found errors.
    IntegrityFailed { issues: usize },
    /// Health score recomputed.
    ScoreComputed {
        /// Score scaled to 0-100
        score_percent: u8,
        status: String,
    },
    /// Selective cleanup finished.
    MaintenanceCompleted {
        items_removed: usize,
        bytes_freed: u64,
    },
}

impl HealthEvent {
    fn description(&self) -> &str {
        match self {
            HealthEvent::IntegrityFailed { .. } => "Integrity check failed",
            HealthEvent::ScoreComputed { .. } => "Health score computed",
            HealthEvent::MaintenanceCompleted { .. } => "Maintenance completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to engine events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: EngineEvent) -> Result<usize, SendError<EngineEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&EngineEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, EngineEvent};
///
/// let event_bus = EventBus::new(100);
/// let migration_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, EngineEvent::Migration(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<EngineEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<EngineEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EngineEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &EngineEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<EngineEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<EngineEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn drained() -> EngineEvent {
        EngineEvent::Queue(QueueEvent::Drained {
            synced: 3,
            failed: 1,
            dropped: 0,
            pending: 1,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(drained()).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = EngineEvent::Content(ContentEvent::Refreshed {
            content_id: "c-1".to_string(),
            date: "2024-05-01".to_string(),
            version: 2,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, EngineEvent::Migration(_)));

        bus.emit(drained()).ok();

        let rollback = EngineEvent::Migration(MigrationEvent::RolledBack {
            reason: "error rate".to_string(),
            level: "FeatureFlag".to_string(),
            automatic: true,
        });
        bus.emit(rollback.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), rollback);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..5 {
            bus.emit(drained()).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let rollback = EngineEvent::Migration(MigrationEvent::RolledBack {
            reason: "criteria".to_string(),
            level: "FeatureFlag".to_string(),
            automatic: false,
        });
        assert_eq!(rollback.severity(), EventSeverity::Error);

        let overflow = EngineEvent::Queue(QueueEvent::Overflow {
            evicted_action_id: "a-1".to_string(),
        });
        assert_eq!(overflow.severity(), EventSeverity::Warning);
        assert_eq!(drained().severity(), EventSeverity::Info);

        let scheduled = EngineEvent::Scheduler(SchedulerEvent::RefreshScheduled {
            next_refresh_at: 1_710_000_000,
            offset_minutes: -300,
        });
        assert_eq!(scheduled.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_description() {
        assert_eq!(drained().description(), "Queue drained");
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::Scheduler(SchedulerEvent::TimezoneChanged {
            previous_offset_minutes: -300,
            offset_minutes: -240,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Scheduler");
        assert_eq!(json["payload"]["event"], "TimezoneChanged");

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
