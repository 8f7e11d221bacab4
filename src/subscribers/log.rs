//! # LogWriter: renders hub events as `tracing` records.
//!
//! Severity follows what an operator needs to see:
//!
//! ```text
//! warn   consumer tripped, retries exhausted, delivery panicked, grace exceeded,
//!        queue length warning, subscriber overflow/panic
//! info   consumer registered/unregistered, drain started/finished
//! debug  delivery failed, retry scheduled, message dropped
//! ```
//!
//! ## Example
//! ```no_run
//! # use std::sync::Arc;
//! # use notihub::{Config, HubBuilder, LogWriter, Subscribe};
//! # async fn demo() {
//! let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//! let hub = HubBuilder::new(Config::default()).with_subscribers(subs).build();
//! # }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that writes every event through `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let consumer = e.consumer.map(|c| c.get());
        let identity = e.identity.as_deref();
        let reason = e.reason.as_deref();

        match e.kind {
            EventKind::ConsumerRegistered => tracing::info!(
                seq = e.seq,
                consumer,
                consumer_type = e.consumer_type.map(|t| t.as_label()),
                identity,
                "[registered]"
            ),
            EventKind::ConsumerUnregistered => tracing::info!(
                seq = e.seq,
                consumer,
                consumer_type = e.consumer_type.map(|t| t.as_label()),
                identity,
                reason,
                "[unregistered]"
            ),
            EventKind::ConsumerTripped => tracing::warn!(
                seq = e.seq,
                consumer,
                identity,
                failures = e.attempt,
                "[tripped]"
            ),
            EventKind::MessageDropped => tracing::debug!(
                seq = e.seq,
                identity,
                queue_len = e.queue_len,
                reason,
                "[dropped]"
            ),
            EventKind::QueueLengthWarning => {
                tracing::warn!(seq = e.seq, identity, queue_len = e.queue_len, "[queue-long]")
            }
            EventKind::DeliveryFailed => tracing::debug!(
                seq = e.seq,
                consumer,
                identity,
                attempt = e.attempt,
                reason,
                "[failed]"
            ),
            EventKind::RetryScheduled => tracing::debug!(
                seq = e.seq,
                consumer,
                identity,
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                "[retry]"
            ),
            EventKind::RetriesExhausted => tracing::warn!(
                seq = e.seq,
                consumer,
                identity,
                attempts = e.attempt,
                reason,
                "[exhausted]"
            ),
            EventKind::DeliveryPanicked => {
                tracing::warn!(seq = e.seq, consumer, identity, reason, "[panicked]")
            }
            EventKind::DrainStarted => tracing::info!(seq = e.seq, queues = e.queue_len, "[drain-started]"),
            EventKind::AllDrainedWithin => tracing::info!(seq = e.seq, "[all-drained-within-grace]"),
            EventKind::GraceExceeded => tracing::warn!(seq = e.seq, stuck = reason, "[grace-exceeded]"),
            EventKind::SubscriberOverflow => tracing::warn!(
                seq = e.seq,
                subscriber = e.subscriber,
                reason,
                "[subscriber-overflow]"
            ),
            EventKind::SubscriberPanicked => tracing::warn!(
                seq = e.seq,
                subscriber = e.subscriber,
                reason,
                "[subscriber-panicked]"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
