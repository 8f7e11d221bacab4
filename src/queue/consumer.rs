//! # ConsumerQueue: per-identity delivery with retry and a dead-consumer breaker.
//!
//! Wraps a [`Queue`] of [`Delivery`]s bound for one remote identity. The worker
//! delivers items one at a time; failures are retried after a randomized delay and
//! counted by a [`FailureBreaker`]. When the breaker trips, the consumer is
//! **reported** to the registry over an unbounded channel; the queue never touches
//! the registry itself, so no registry lock is ever taken under a queue lock.
//!
//! ## Flow
//! ```text
//! take_front (in flight)
//!   ├─ registration revoked ──► skip (removed, not delivered, no failure)
//!   └─ attempt(delivery)
//!        ├─ Ok  ──► breaker reset ──► finish
//!        └─ Err ──► breaker.record_failure()
//!                   │     └─ tripped ──► UnregisterRequest ──► registry listener
//!                   ├─ retries left ──► timer task: sleep(random [min, max]) ──► requeue at priority
//!                   └─ exhausted    ──► drop (lost)
//! ```
//!
//! ## Rules
//! - The breaker counts consecutive failures across distinct messages.
//! - A retry wait runs off the worker, so a failing consumer never holds back the
//!   other consumers of its identity.
//! - A waiting retry keeps its item in flight, so a drain waits for it.
//! - Invalidating the queue or cancelling the hub token cuts a retry wait short;
//!   the item is then dropped as lost.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::consumer::{ConsumerId, ServerIdentity};
use crate::error::{DeliveryError, QueueError};
use crate::events::{Bus, Event, EventKind};
use crate::message::Delivery;
use crate::policies::{FailureBreaker, RetryPolicy};

use super::{Finished, ProcessReport, Processed, Queue, QueueItem, QueueStats, attempt};

/// A consumer the breaker considers dead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnregisterRequest {
    /// Consumer whose delivery tripped the breaker.
    pub consumer: ConsumerId,
    /// Identity of the queue that observed the failures.
    pub identity: ServerIdentity,
    /// Consecutive failures at the time of the trip.
    pub failures: u32,
}

/// Queue of deliveries to one remote identity, with retry and breaker.
pub struct ConsumerQueue {
    queue: Arc<Queue<Delivery>>,
    identity: ServerIdentity,
    retry: RetryPolicy,
    breaker: FailureBreaker,
    timeout: Option<Duration>,
    reports: mpsc::UnboundedSender<UnregisterRequest>,
    token: CancellationToken,
    bus: Bus,
}

impl ConsumerQueue {
    /// Creates the queue for `identity`.
    ///
    /// `token` stops the worker and cuts retry waits short; the directory passes a
    /// child of the hub token.
    pub fn new(
        identity: ServerIdentity,
        cfg: &Config,
        bus: Bus,
        reports: mpsc::UnboundedSender<UnregisterRequest>,
        token: CancellationToken,
    ) -> Self {
        let queue = Arc::new(Queue::new(identity.as_str(), cfg.consumer_queue_limits()).with_bus(bus.clone()));
        Self {
            queue,
            identity,
            retry: cfg.retry_policy(),
            breaker: cfg.breaker(),
            timeout: cfg.delivery_timeout(),
            reports,
            token,
            bus,
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// The underlying queue.
    pub fn queue(&self) -> &Queue<Delivery> {
        &self.queue
    }

    /// FIFO enqueue bounded by `consumer_queue_length_limit`.
    pub fn insert(&self, item: impl Into<QueueItem<Delivery>>) -> bool {
        self.queue.insert(item)
    }

    /// Priority enqueue, never rejected.
    pub fn append(&self, item: impl Into<QueueItem<Delivery>>) {
        self.queue.append(item)
    }

    /// Priority enqueue, then wait for the final outcome of the delivery.
    pub async fn append_and_wait(
        &self,
        item: impl Into<QueueItem<Delivery>>,
    ) -> Result<Processed<Delivery>, QueueError> {
        self.queue.append_and_wait(item).await
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dirty_is_empty(&self) -> bool {
        self.queue.dirty_is_empty()
    }

    /// True only when nothing is queued **and** no delivery (or retry wait) is in flight.
    pub fn is_empty_and_actions_complete(&self) -> bool {
        self.queue.is_empty_and_actions_complete()
    }

    pub fn set_state(&self, valid: bool) {
        self.queue.set_state(valid)
    }

    pub fn have_valid_state(&self) -> bool {
        self.queue.have_valid_state()
    }

    pub fn duplicate(&self) {
        self.queue.duplicate()
    }

    pub fn release(&self) -> bool {
        self.queue.release()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Consecutive failed deliveries since the last success or trip.
    pub fn failed_messages(&self) -> u32 {
        self.breaker.failures()
    }

    /// Drops everything still queued. Returns how many items were abandoned.
    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    /// Delivers one item (or every available item when `multiple`).
    ///
    /// `removed` counts items taken off the queue, including ones queued again for
    /// retry; `delivered` counts successes only.
    pub async fn process(&self, multiple: bool) -> ProcessReport {
        let mut report = ProcessReport::default();

        while let Some(item) = self.queue.take_front() {
            report.removed += 1;

            if !item.value().is_live() {
                tracing::trace!(identity = %self.identity, consumer = %item.value().consumer_id(), "skipping delivery to revoked consumer");
                self.queue.finish_in_flight(Finished::Skipped);
                item.finish(false);
            } else {
                match attempt(item.value(), self.timeout).await {
                    Ok(()) => {
                        self.breaker.record_success();
                        report.delivered += 1;
                        self.queue.finish_in_flight(Finished::Delivered);
                        item.finish(true);
                    }
                    Err(err) => self.on_failure(item, err),
                }
            }

            if !multiple {
                break;
            }
        }
        report
    }

    fn on_failure(&self, item: QueueItem<Delivery>, err: DeliveryError) {
        let consumer = item.value().consumer_id();
        let retries = item.value().retries();
        let attempt_no = retries.saturating_add(1);

        tracing::debug!(
            identity = %self.identity,
            consumer = %consumer,
            message = item.value().message().name(),
            attempt = attempt_no,
            error = %err,
            "delivery failed"
        );
        if matches!(err, DeliveryError::Panicked { .. }) {
            self.bus.publish(
                Event::new(EventKind::DeliveryPanicked)
                    .with_consumer(consumer)
                    .with_identity(self.identity.as_str())
                    .with_reason(err.to_string()),
            );
        }
        self.bus.publish(
            Event::new(EventKind::DeliveryFailed)
                .with_consumer(consumer)
                .with_identity(self.identity.as_str())
                .with_attempt(attempt_no)
                .with_reason(err.as_label()),
        );

        if let Some(failures) = self.breaker.record_failure() {
            self.report_dead(consumer, failures);
        }

        if err.is_retryable() && self.retry.allows(retries) && self.queue.have_valid_state() {
            let delay = self.retry.delay();
            self.bus.publish(
                Event::new(EventKind::RetryScheduled)
                    .with_consumer(consumer)
                    .with_identity(self.identity.as_str())
                    .with_attempt(attempt_no)
                    .with_delay(delay),
            );
            self.schedule_retry(item, delay, attempt_no, err.as_label());
            return;
        }

        give_up(&self.queue, &self.bus, &self.identity, item, attempt_no, err.as_label());
    }

    /// Hands `item` to a timer task that puts it back at its priority after `delay`.
    ///
    /// The item stays in flight meanwhile, so the worker moves on to other consumers
    /// while a drain still waits for the retry. Invalidating the queue or cancelling
    /// the token ends the wait and the item is lost.
    fn schedule_retry(&self, mut item: QueueItem<Delivery>, delay: Duration, attempt_no: u32, reason: &'static str) {
        let queue = Arc::clone(&self.queue);
        let token = self.token.clone();
        let bus = self.bus.clone();
        let identity = self.identity.clone();

        tokio::spawn(async move {
            let elapsed = tokio::select! {
                _ = time::sleep(delay) => true,
                _ = queue.invalidated() => false,
                _ = token.cancelled() => false,
            };
            if elapsed && queue.have_valid_state() {
                item.value_mut().bump_retries();
                queue.requeue(item);
                if !queue.have_valid_state() {
                    queue.clear();
                }
            } else {
                give_up(&queue, &bus, &identity, item, attempt_no, reason);
            }
        });
    }

    fn report_dead(&self, consumer: ConsumerId, failures: u32) {
        tracing::warn!(
            identity = %self.identity,
            consumer = %consumer,
            failures,
            "consumer looks dead; requesting unregistration"
        );
        self.bus.publish(
            Event::new(EventKind::ConsumerTripped)
                .with_consumer(consumer)
                .with_identity(self.identity.as_str())
                .with_attempt(failures),
        );

        let req = UnregisterRequest {
            consumer,
            identity: self.identity.clone(),
            failures,
        };
        if self.reports.send(req).is_err() {
            tracing::debug!(identity = %self.identity, consumer = %consumer, "registry gone; unregister request discarded");
        }
    }

    /// Worker loop: wait for work, deliver everything available, repeat until the
    /// queue is invalid or the token cancelled.
    pub async fn run_worker(self: Arc<Self>) {
        while self.queue.wait_for_work(&self.token).await {
            self.process(true).await;
        }
        tracing::trace!(identity = %self.identity, "consumer queue worker exited");
    }
}

/// Drops an item that will not be attempted again.
fn give_up(
    queue: &Queue<Delivery>,
    bus: &Bus,
    identity: &ServerIdentity,
    item: QueueItem<Delivery>,
    attempt_no: u32,
    reason: &'static str,
) {
    let consumer = item.value().consumer_id();
    tracing::debug!(%identity, consumer = %consumer, attempts = attempt_no, "message dropped after final attempt");
    bus.publish(
        Event::new(EventKind::RetriesExhausted)
            .with_consumer(consumer)
            .with_identity(identity.as_str())
            .with_attempt(attempt_no)
            .with_reason(reason),
    );
    queue.finish_in_flight(Finished::Lost);
    item.finish(false);
}

impl fmt::Debug for ConsumerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerQueue")
            .field("identity", &self.identity)
            .field("length", &self.queue.len())
            .field("failed_messages", &self.failed_messages())
            .field("valid", &self.have_valid_state())
            .finish()
    }
}
