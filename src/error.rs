//! Error types used by the notification hub.
//!
//! This module defines three error enums:
//!
//! - [`HubError`]: errors returned synchronously by registration, lookup and shutdown.
//! - [`DeliveryError`]: the outcome of one failed delivery attempt to a consumer.
//! - [`QueueError`]: failures while waiting for an item handed to a queue.
//!
//! All types provide `as_label` for logs/metrics. Delivery errors never reach the
//! producer that called `broadcast`; they drive retries and the dead-consumer breaker.

use std::time::Duration;
use thiserror::Error;

use crate::consumer::ConsumerId;

/// # Errors produced by the hub itself.
///
/// Registration errors are returned to the caller; per-consumer queue overflow is
/// reported through [`BroadcastReport`](crate::BroadcastReport) instead, so that one
/// full queue never fails a whole broadcast.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// An index or directory could not grow, or the id space is exhausted.
    #[error("out of memory while {context}")]
    OutOfMemory {
        /// What the hub was doing when the reservation failed.
        context: &'static str,
    },

    /// No registration exists for the given id (or proxy).
    #[error("consumer {id:?} is not registered")]
    ConsumerUnknown {
        /// The id that was looked up, if the lookup was by id.
        id: Option<ConsumerId>,
    },

    /// The proxy is not bound to a remote endpoint.
    #[error("consumer proxy is not bound to an endpoint")]
    InvalidConsumer,

    /// A FIFO enqueue was rejected because the queue reached its length limit.
    #[error("queue full (limit {limit})")]
    QueueFull {
        /// The configured length limit.
        limit: usize,
    },

    /// The hub has been shut down and accepts no more work.
    #[error("hub is shutting down")]
    ShuttingDown,

    /// Some queues were still busy when the drain ceiling was reached.
    #[error("drain grace {grace:?} exceeded; undrained: {stuck:?}")]
    GraceExceeded {
        /// The configured drain ceiling.
        grace: Duration,
        /// Identities whose queues did not drain in time.
        stuck: Vec<String>,
    },
}

impl HubError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use notihub::HubError;
    ///
    /// let err = HubError::ConsumerUnknown { id: None };
    /// assert_eq!(err.as_label(), "hub_consumer_unknown");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HubError::OutOfMemory { .. } => "hub_out_of_memory",
            HubError::ConsumerUnknown { .. } => "hub_consumer_unknown",
            HubError::InvalidConsumer => "hub_invalid_consumer",
            HubError::QueueFull { .. } => "hub_queue_full",
            HubError::ShuttingDown => "hub_shutting_down",
            HubError::GraceExceeded { .. } => "hub_grace_exceeded",
        }
    }
}

/// # Outcome of one failed delivery attempt.
///
/// Transports return [`DeliveryError::Failed`]; the consumer queue adds
/// [`DeliveryError::Timeout`] and [`DeliveryError::Panicked`] itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The remote call failed.
    #[error("delivery failed: {error}")]
    Failed {
        /// The underlying transport message.
        error: String,
    },

    /// The remote call did not finish within the configured delivery timeout.
    #[error("delivery timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The delivery action panicked.
    #[error("delivery panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The consumer was unregistered before the attempt ran.
    #[error("consumer revoked")]
    Revoked,
}

impl DeliveryError {
    /// Shorthand for [`DeliveryError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        DeliveryError::Failed {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Failed { .. } => "delivery_failed",
            DeliveryError::Timeout { .. } => "delivery_timeout",
            DeliveryError::Panicked { .. } => "delivery_panicked",
            DeliveryError::Revoked => "delivery_revoked",
        }
    }

    /// Indicates whether another attempt may succeed.
    ///
    /// Returns `false` only for [`DeliveryError::Revoked`].
    ///
    /// # Example
    /// ```
    /// use notihub::DeliveryError;
    ///
    /// assert!(DeliveryError::failed("connection reset").is_retryable());
    /// assert!(!DeliveryError::Revoked.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Revoked)
    }
}

/// # Errors observed by a caller waiting on an appended item.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue went away before processing the item.
    #[error("queue closed before the item was processed")]
    Closed,

    /// The wait was abandoned after the given timeout; the item stays queued.
    #[error("gave up waiting after {timeout:?}")]
    WaitTimedOut {
        /// The timeout that was exceeded.
        timeout: Duration,
    },
}
