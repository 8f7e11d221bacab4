//! # Runtime events emitted by the hub, its registry and its queues.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Registration events**: consumers coming and going (including the breaker)
//! - **Delivery events**: failures, retries, drops and queue pressure
//! - **Shutdown events**: the drain at teardown
//! - **Observer events**: trouble inside the subscriber fan-out itself
//!
//! The [`Event`] struct carries the metadata: timestamp, consumer, identity, attempt,
//! delay and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are observed out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use notihub::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_identity("rip-01:4410")
//!     .with_reason("connection reset")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(350));
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.identity.as_deref(), Some("rip-01:4410"));
//! assert_eq!(ev.delay_ms, Some(350));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::consumer::{ConsumerId, ConsumerType};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Registration events ===
    /// A consumer was registered.
    ///
    /// Sets: `consumer`, `consumer_type`, `identity`.
    ConsumerRegistered,

    /// A consumer was unregistered (explicitly, by the breaker, or because its server died).
    ///
    /// Sets: `consumer`, `consumer_type`, `identity`, `reason`.
    ConsumerUnregistered,

    /// The breaker saw too many consecutive failures and asked for unregistration.
    ///
    /// Sets: `consumer`, `identity`, `attempt` (consecutive failures).
    ConsumerTripped,

    // === Delivery events ===
    /// A FIFO enqueue was rejected by the queue length limit.
    ///
    /// Sets: `identity`, `queue_len`, `consumer` (when known).
    MessageDropped,

    /// A queue grew past its warning threshold.
    ///
    /// Sets: `identity`, `queue_len`.
    QueueLengthWarning,

    /// One delivery attempt failed.
    ///
    /// Sets: `consumer`, `identity`, `attempt`, `reason`.
    DeliveryFailed,

    /// A failed delivery will be retried after `delay_ms`.
    ///
    /// Sets: `consumer`, `identity`, `attempt`, `delay_ms`.
    RetryScheduled,

    /// A message ran out of retries and was discarded.
    ///
    /// Sets: `consumer`, `identity`, `attempt`, `reason`.
    RetriesExhausted,

    /// A delivery action panicked (caught and counted as a failure).
    ///
    /// Sets: `consumer`, `identity`, `reason`.
    DeliveryPanicked,

    // === Shutdown events ===
    /// The drain at teardown started.
    ///
    /// Sets: `queue_len` (number of queues).
    DrainStarted,

    /// Every queue drained before the ceiling.
    AllDrainedWithin,

    /// The drain ceiling was reached with queues still busy.
    ///
    /// Sets: `reason` (undrained identities).
    GraceExceeded,

    // === Observer events ===
    /// A subscriber's queue was full (or closed); the event was dropped for it.
    ///
    /// Sets: `subscriber`, `reason`.
    SubscriberOverflow,

    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `subscriber`, `reason` (panic info).
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Consumer concerned, if any.
    pub consumer: Option<ConsumerId>,
    /// Consumer type concerned, if any.
    pub consumer_type: Option<ConsumerType>,
    /// Server identity of the queue concerned.
    pub identity: Option<Arc<str>>,
    /// Attempt count or consecutive failure count (starting from 1).
    pub attempt: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Queue length (or queue count for drain events).
    pub queue_len: Option<usize>,
    /// Human-readable reason (errors, drop details, etc.).
    pub reason: Option<Arc<str>>,
    /// Subscriber concerned, for observer events.
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            consumer: None,
            consumer_type: None,
            identity: None,
            attempt: None,
            delay_ms: None,
            queue_len: None,
            reason: None,
            subscriber: None,
        }
    }

    /// Creates a `SubscriberOverflow` event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a `SubscriberPanicked` event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Attaches a consumer id.
    #[inline]
    pub fn with_consumer(mut self, id: ConsumerId) -> Self {
        self.consumer = Some(id);
        self
    }

    /// Attaches a consumer type.
    #[inline]
    pub fn with_consumer_type(mut self, kind: ConsumerType) -> Self {
        self.consumer_type = Some(kind);
        self
    }

    /// Attaches a server identity.
    #[inline]
    pub fn with_identity(mut self, identity: impl Into<Arc<str>>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a queue length.
    #[inline]
    pub fn with_queue_len(mut self, len: usize) -> Self {
        self.queue_len = Some(len);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn is_delivery_problem(&self) -> bool {
        matches!(
            self.kind,
            EventKind::DeliveryFailed | EventKind::RetriesExhausted | EventKind::DeliveryPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::DrainStarted);
        let b = Event::new(EventKind::AllDrainedWithin);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delivery_problems_are_classified() {
        assert!(Event::new(EventKind::RetriesExhausted).is_delivery_problem());
        assert!(!Event::new(EventKind::RetryScheduled).is_delivery_problem());
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::RetryScheduled).with_delay(Duration::from_secs(u64::MAX / 4));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
