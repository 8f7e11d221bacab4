//! # Hub configuration.
//!
//! Provides [`Config`] centralized settings for the notification hub.
//!
//! Config is used in three places:
//! 1. **Hub creation**: `Hub::builder(config).build()`
//! 2. **Consumer queues**: retry policy, breaker threshold, length thresholds
//! 3. **Shutdown**: drain ceiling and polling increment
//!
//! ## Sentinel values
//! - `delivery_timeout = 0s` → no per-attempt timeout (the transport's own timeout applies)
//! - `queue_length_limit = 0` / `consumer_queue_length_limit = 0` → unbounded FIFO enqueue

use std::time::Duration;

use crate::policies::{FailureBreaker, RetryPolicy};
use crate::queue::QueueLimits;

/// Global configuration for the notification hub.
///
/// ## Field semantics
/// - `max_retries`: retries per message after its first failed attempt (`0` = never retry)
/// - `min_retry_delay` / `max_retry_delay`: bounds of the randomized delay before a retry
/// - `max_failed_messages`: consecutive failures (across messages) that unregister a consumer
/// - `queue_length_warn` / `queue_length_limit`: thresholds for plain [`Queue`](crate::Queue)s
/// - `consumer_queue_length_warn` / `consumer_queue_length_limit`: thresholds for
///   per-identity [`ConsumerQueue`](crate::ConsumerQueue)s
/// - `delivery_timeout`: per-attempt timeout (`0s` = none)
/// - `drain_grace`: total ceiling for draining queues at shutdown
/// - `drain_poll`: polling increment while draining
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug)]
pub struct Config {
    /// Retries per message after the first failed attempt.
    pub max_retries: u32,
    /// Lower bound of the randomized retry delay.
    pub min_retry_delay: Duration,
    /// Upper bound of the randomized retry delay.
    pub max_retry_delay: Duration,
    /// Consecutive failed deliveries before the consumer is reported dead.
    pub max_failed_messages: u32,
    /// Length at which a plain queue logs a warning.
    pub queue_length_warn: usize,
    /// Length beyond which plain-queue FIFO enqueues are rejected.
    pub queue_length_limit: usize,
    /// Length at which a consumer queue logs a warning.
    pub consumer_queue_length_warn: usize,
    /// Length beyond which consumer-queue FIFO enqueues are rejected.
    pub consumer_queue_length_limit: usize,
    /// Per-attempt delivery timeout; `Duration::ZERO` disables it.
    pub delivery_timeout: Duration,
    /// Maximum total time spent draining queues at shutdown.
    pub drain_grace: Duration,
    /// Polling increment used while draining.
    pub drain_poll: Duration,
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns the per-attempt delivery timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → each delivery attempt is bounded by `d`
    #[inline]
    pub fn delivery_timeout(&self) -> Option<Duration> {
        if self.delivery_timeout == Duration::ZERO {
            None
        } else {
            Some(self.delivery_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the drain polling increment clamped to at least 1ms.
    #[inline]
    pub fn drain_poll_clamped(&self) -> Duration {
        self.drain_poll.max(Duration::from_millis(1))
    }

    /// Retry policy for consumer queues.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            min_delay: self.min_retry_delay,
            max_delay: self.max_retry_delay,
        }
    }

    /// Fresh breaker for one consumer queue.
    pub fn breaker(&self) -> FailureBreaker {
        FailureBreaker::new(self.max_failed_messages)
    }

    /// Thresholds for plain queues.
    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits::new(self.queue_length_warn, self.queue_length_limit)
    }

    /// Thresholds for per-identity consumer queues.
    pub fn consumer_queue_limits(&self) -> QueueLimits {
        QueueLimits::new(self.consumer_queue_length_warn, self.consumer_queue_length_limit)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_retries = 5`, retry delay in `[100ms, 1s]`
    /// - `max_failed_messages = 10`
    /// - plain queues warn at 500, reject at 1000
    /// - consumer queues warn at 100, reject at 200
    /// - `delivery_timeout = 0s` (none)
    /// - `drain_grace = 2s`, `drain_poll = 10ms`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(1),
            max_failed_messages: 10,
            queue_length_warn: 500,
            queue_length_limit: 1000,
            consumer_queue_length_warn: 100,
            consumer_queue_length_limit: 200,
            delivery_timeout: Duration::ZERO,
            drain_grace: Duration::from_secs(2),
            drain_poll: Duration::from_millis(10),
            bus_capacity: 1024,
        }
    }
}
