//! # Queue: thread-safe priority/FIFO container with one worker.
//!
//! [`Queue`] holds [`QueueItem`]s in a `VecDeque` behind a `std::sync::Mutex` and wakes
//! a single worker through a [`Notify`] that stores at most one permit. The worker
//! drains everything available on each wake, so one permit per burst is enough.
//!
//! ## Enqueue styles
//! ```text
//! insert(item)   FIFO at the tail, ignores priority, rejected past `limit`
//! append(item)   after the last item of equal or higher priority, never rejected
//!
//! append N1, H, N2  ──►  [H, N1, N2]
//! ```
//!
//! ## Rules
//! - No lock is held across an `.await`.
//! - `length` always equals the number of queued items; `dirty_is_empty` reads a
//!   lock-free mirror of it.
//! - Items are marked in flight atomically with their removal, so
//!   [`Queue::is_empty_and_actions_complete`] never reports a queue idle while a
//!   worker still runs an action.
//! - Holder counting: the queue starts with one holder; the release that brings the
//!   count to zero invalidates the queue exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::events::{Bus, Event, EventKind};

use super::item::{Priority, Processed, QueueItem};
use super::{Deliver, attempt};

/// Warning and rejection thresholds. A zero value disables the threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueLimits {
    /// Length at which a warning is logged (once per crossing).
    pub warn: usize,
    /// Length beyond which `insert` rejects.
    pub limit: usize,
}

impl QueueLimits {
    pub fn new(warn: usize, limit: usize) -> Self {
        Self { warn, limit }
    }

    /// No warning, no limit.
    pub fn unbounded() -> Self {
        Self { warn: 0, limit: 0 }
    }

    #[inline]
    fn admits(&self, len: usize) -> bool {
        self.limit == 0 || len < self.limit
    }

    #[inline]
    fn warns_at(&self, len: usize) -> bool {
        self.warn > 0 && len >= self.warn
    }
}

/// Counts returned by one `process` call.
///
/// `removed` may exceed `delivered`: failed items, skipped items and items queued
/// again for retry are removed without being delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Items taken off the queue.
    pub removed: usize,
    /// Items whose action succeeded.
    pub delivered: usize,
}

/// Point-in-time counters of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueStats {
    /// Current number of queued items.
    pub length: usize,
    /// Largest length observed.
    pub high_water: usize,
    /// Items rejected by `insert` at the limit.
    pub items_dropped: u64,
    /// Items taken off the queue (including retries).
    pub removed: u64,
    /// Items whose action succeeded.
    pub delivered: u64,
    /// Items discarded after their last failed attempt.
    pub lost: u64,
    /// Items currently being processed.
    pub in_flight: usize,
    /// Configured thresholds.
    pub limits: QueueLimits,
}

/// How an in-flight item left the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Finished {
    Delivered,
    Lost,
    Skipped,
}

struct State<T> {
    items: VecDeque<QueueItem<T>>,
    high_water: usize,
    dropped: u64,
    removed: u64,
    delivered: u64,
    lost: u64,
    in_flight: usize,
    warned: bool,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            high_water: 0,
            dropped: 0,
            removed: 0,
            delivered: 0,
            lost: 0,
            in_flight: 0,
            warned: false,
        }
    }

    /// Index after the last item that must stay ahead of a `priority` item.
    fn priority_slot(&self, priority: Priority) -> usize {
        self.items
            .iter()
            .rposition(|queued| queued.priority() >= priority)
            .map_or(0, |i| i + 1)
    }
}

/// Thread-safe priority/FIFO queue processed by one worker.
pub struct Queue<T> {
    name: Arc<str>,
    state: Mutex<State<T>>,
    len: AtomicUsize,
    limits: QueueLimits,
    wake: Notify,
    state_changed: Notify,
    valid: AtomicBool,
    holders: AtomicUsize,
    bus: Option<Bus>,
}

impl<T: Send> Queue<T> {
    /// Creates a valid, empty queue with one holder.
    pub fn new(name: impl Into<Arc<str>>, limits: QueueLimits) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::new()),
            len: AtomicUsize::new(0),
            limits,
            wake: Notify::new(),
            state_changed: Notify::new(),
            valid: AtomicBool::new(true),
            holders: AtomicUsize::new(1),
            bus: None,
        }
    }

    /// Publishes drop and length-warning events on `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// FIFO enqueue at the tail, ignoring priority.
    ///
    /// Returns `false` and drops the item (counting it in `items_dropped`) if the
    /// queue is at its length limit. A waiter on a dropped item sees
    /// [`QueueError::Closed`]. Never blocks beyond the mutex hold.
    pub fn insert(&self, item: impl Into<QueueItem<T>>) -> bool {
        let item = item.into();
        let mut st = self.lock();

        let len = st.items.len();
        if !self.limits.admits(len) {
            st.dropped += 1;
            drop(st);
            drop(item);
            tracing::debug!(queue = %self.name, length = len, "queue full, item dropped");
            self.publish(
                Event::new(EventKind::MessageDropped)
                    .with_identity(Arc::clone(&self.name))
                    .with_queue_len(len)
                    .with_reason("queue_full"),
            );
            return false;
        }

        st.items.push_back(item);
        let warn = self.grew(&mut st);
        drop(st);

        self.after_grow(warn);
        true
    }

    /// Priority enqueue: behind every queued item of equal or higher priority,
    /// ahead of lower ones. Never rejected by the length limit.
    pub fn append(&self, item: impl Into<QueueItem<T>>) {
        let item = item.into();
        let mut st = self.lock();
        let at = st.priority_slot(item.priority());
        st.items.insert(at, item);
        let warn = self.grew(&mut st);
        drop(st);

        self.after_grow(warn);
    }

    /// Appends and waits until the item has been processed.
    ///
    /// The synchronous "deliver and confirm" path: the payload comes back together
    /// with the outcome of its final attempt.
    pub async fn append_and_wait(
        &self,
        item: impl Into<QueueItem<T>>,
    ) -> Result<Processed<T>, QueueError> {
        let (item, done) = item.into().with_completion();
        self.append(item);
        done.wait().await
    }

    /// Like [`append_and_wait`](Self::append_and_wait), giving up after `timeout`.
    pub async fn append_and_wait_timeout(
        &self,
        item: impl Into<QueueItem<T>>,
        timeout: Duration,
    ) -> Result<Processed<T>, QueueError> {
        let (item, done) = item.into().with_completion();
        self.append(item);
        done.wait_timeout(timeout).await
    }

    /// Updates length bookkeeping after a push. Returns `Some(len)` when the warning
    /// threshold was crossed upward.
    fn grew(&self, st: &mut State<T>) -> Option<usize> {
        let len = st.items.len();
        self.len.store(len, Ordering::Release);
        st.high_water = st.high_water.max(len);

        if self.limits.warns_at(len) && !st.warned {
            st.warned = true;
            Some(len)
        } else {
            None
        }
    }

    fn after_grow(&self, warn: Option<usize>) {
        if let Some(len) = warn {
            tracing::warn!(queue = %self.name, length = len, warn = self.limits.warn, "queue length above warning threshold");
            self.publish(
                Event::new(EventKind::QueueLengthWarning)
                    .with_identity(Arc::clone(&self.name))
                    .with_queue_len(len),
            );
        }
        self.wake.notify_one();
    }

    fn shrank(&self, st: &mut State<T>) {
        let len = st.items.len();
        self.len.store(len, Ordering::Release);
        if st.warned && !self.limits.warns_at(len) {
            st.warned = false;
        }
    }

    /// Removes the front item and marks it in flight, in one critical section.
    pub(crate) fn take_front(&self) -> Option<QueueItem<T>> {
        let mut st = self.lock();
        let item = st.items.pop_front()?;
        st.removed += 1;
        st.in_flight += 1;
        self.shrank(&mut st);
        Some(item)
    }

    /// Clears the in-flight mark of an item that has left the worker.
    pub(crate) fn finish_in_flight(&self, how: Finished) {
        let mut st = self.lock();
        debug_assert!(st.in_flight > 0, "finish without take");
        st.in_flight = st.in_flight.saturating_sub(1);
        match how {
            Finished::Delivered => st.delivered += 1,
            Finished::Lost => st.lost += 1,
            Finished::Skipped => {}
        }
    }

    /// Puts an in-flight item back at its priority and clears its in-flight mark.
    pub(crate) fn requeue(&self, item: QueueItem<T>) {
        let mut st = self.lock();
        st.in_flight = st.in_flight.saturating_sub(1);
        let at = st.priority_slot(item.priority());
        st.items.insert(at, item);
        let warn = self.grew(&mut st);
        drop(st);

        self.after_grow(warn);
    }

    /// Drops every queued item, counting them lost. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut st = self.lock();
        let abandoned: Vec<_> = st.items.drain(..).collect();
        st.lost += abandoned.len() as u64;
        self.shrank(&mut st);
        drop(st);

        let n = abandoned.len();
        drop(abandoned);
        n
    }

    /// Locked emptiness check.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Unlocked emptiness check; may be stale by the time it returns.
    pub fn dirty_is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    /// Current number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when nothing is queued and no action is running.
    pub fn is_empty_and_actions_complete(&self) -> bool {
        let st = self.lock();
        st.items.is_empty() && st.in_flight == 0
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.lock();
        QueueStats {
            length: st.items.len(),
            high_water: st.high_water,
            items_dropped: st.dropped,
            removed: st.removed,
            delivered: st.delivered,
            lost: st.lost,
            in_flight: st.in_flight,
            limits: self.limits,
        }
    }

    /// Sets the cooperative-cancellation flag. Invalidating wakes the worker so it
    /// can observe the change and exit.
    pub fn set_state(&self, valid: bool) {
        let was = self.valid.swap(valid, Ordering::AcqRel);
        if was && !valid {
            self.wake.notify_one();
            self.state_changed.notify_waiters();
        }
    }

    pub fn have_valid_state(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Completes once the queue is invalid.
    pub async fn invalidated(&self) {
        loop {
            let changed = self.state_changed.notified();
            if !self.have_valid_state() {
                return;
            }
            changed.await;
        }
    }

    /// Adds a holder.
    pub fn duplicate(&self) {
        self.holders.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a holder. Returns `true` for the release that took the count to zero;
    /// that release also invalidates the queue.
    pub fn release(&self) -> bool {
        match self
            .holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.set_state(false);
                true
            }
            Ok(_) => false,
            Err(_) => {
                debug_assert!(false, "queue '{}' released more often than held", self.name);
                false
            }
        }
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    /// Waits for work. Returns `false` once the queue is invalid or `token` is cancelled.
    pub async fn wait_for_work(&self, token: &CancellationToken) -> bool {
        if !self.have_valid_state() || token.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = token.cancelled() => false,
            _ = self.wake.notified() => self.have_valid_state(),
        }
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

impl<T: Deliver> Queue<T> {
    /// Removes one item (or every available item when `multiple`) and runs its action.
    ///
    /// Items without a completion are dropped after their action; items with one are
    /// handed back through it. Panicking actions count as undelivered.
    pub async fn process(&self, multiple: bool) -> ProcessReport {
        let mut report = ProcessReport::default();

        while let Some(item) = self.take_front() {
            report.removed += 1;

            let delivered = match attempt(item.value(), None).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(queue = %self.name, error = %e, "queue action failed");
                    false
                }
            };

            if delivered {
                report.delivered += 1;
                self.finish_in_flight(Finished::Delivered);
            } else {
                self.finish_in_flight(Finished::Lost);
            }
            item.finish(delivered);

            if !multiple {
                break;
            }
        }
        report
    }

    /// Worker loop: wait, process everything available, repeat until invalid or cancelled.
    pub async fn run_worker(self: Arc<Self>, token: CancellationToken) {
        while self.wait_for_work(&token).await {
            self.process(true).await;
        }
        tracing::trace!(queue = %self.name, "queue worker exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use async_trait::async_trait;

    /// Records its tag into a shared log when delivered.
    #[derive(Debug)]
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl Deliver for Tagged {
        async fn deliver(&self) -> Result<(), DeliveryError> {
            self.log.lock().unwrap().push(self.tag);
            if self.fail {
                Err(DeliveryError::failed("refused"))
            } else {
                Ok(())
            }
        }
    }

    fn tagged(tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Tagged {
        Tagged {
            tag,
            log: Arc::clone(log),
            fail: false,
        }
    }

    fn log() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn insert_then_process_is_fifo() {
        let q: Queue<Tagged> = Queue::new("fifo", QueueLimits::new(0, 10));
        let seen = log();
        for tag in ["a", "b", "c", "d"] {
            assert!(q.insert(tagged(tag, &seen)));
        }
        // priority is ignored by insert
        assert!(q.insert(QueueItem::high(tagged("e", &seen))));

        let report = q.process(true).await;
        assert_eq!(report, ProcessReport { removed: 5, delivered: 5 });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c", "d", "e"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn insert_past_limit_drops_and_counts() {
        let q: Queue<Tagged> = Queue::new("limited", QueueLimits::new(0, 2));
        let seen = log();

        assert!(q.insert(tagged("a", &seen)));
        assert!(q.insert(tagged("b", &seen)));
        assert!(!q.insert(tagged("c", &seen)));

        let stats = q.stats();
        assert_eq!(stats.length, 2);
        assert_eq!(stats.items_dropped, 1);

        let report = q.process(true).await;
        assert_eq!(report.removed, 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn append_is_priority_major_fifo_minor() {
        let q: Queue<Tagged> = Queue::new("prio", QueueLimits::unbounded());
        let seen = log();

        q.append(QueueItem::new(tagged("n1", &seen)));
        q.append(QueueItem::high(tagged("h1", &seen)));
        q.append(QueueItem::new(tagged("n2", &seen)));
        q.append(QueueItem::high(tagged("h2", &seen)));
        q.append(QueueItem::new(tagged("n3", &seen)));

        q.process(true).await;
        assert_eq!(*seen.lock().unwrap(), vec!["h1", "h2", "n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn append_scenario_normal_high_normal() {
        let q: Queue<Tagged> = Queue::new("scenario", QueueLimits::unbounded());
        let seen = log();

        q.append(QueueItem::new(tagged("normal-1", &seen)));
        q.append(QueueItem::high(tagged("high", &seen)));
        q.append(QueueItem::new(tagged("normal-2", &seen)));

        q.process(true).await;
        assert_eq!(*seen.lock().unwrap(), vec!["high", "normal-1", "normal-2"]);
    }

    #[tokio::test]
    async fn append_ignores_limit() {
        let q: Queue<Tagged> = Queue::new("must-deliver", QueueLimits::new(0, 1));
        let seen = log();
        assert!(q.insert(tagged("a", &seen)));
        q.append(QueueItem::high(tagged("b", &seen)));
        q.append(QueueItem::high(tagged("c", &seen)));
        assert_eq!(q.len(), 3);
        assert_eq!(q.stats().items_dropped, 0);
    }

    #[tokio::test]
    async fn process_single_takes_one() {
        let q: Queue<Tagged> = Queue::new("single", QueueLimits::unbounded());
        let seen = log();
        q.insert(tagged("a", &seen));
        q.insert(tagged("b", &seen));

        assert_eq!(q.process(false).await.removed, 1);
        assert_eq!(q.len(), 1);
        assert!(!q.dirty_is_empty());
    }

    #[tokio::test]
    async fn removed_and_delivered_diverge_on_failure() {
        let q: Queue<Tagged> = Queue::new("diverge", QueueLimits::unbounded());
        let seen = log();
        q.insert(tagged("ok", &seen));
        q.insert(Tagged {
            tag: "bad",
            log: Arc::clone(&seen),
            fail: true,
        });

        let report = q.process(true).await;
        assert_eq!(report, ProcessReport { removed: 2, delivered: 1 });
        let stats = q.stats();
        assert_eq!((stats.delivered, stats.lost), (1, 1));
    }

    #[tokio::test]
    async fn completion_returns_value_to_owner() {
        let q: Arc<Queue<Tagged>> = Arc::new(Queue::new("confirm", QueueLimits::unbounded()));
        let token = CancellationToken::new();
        let worker = tokio::spawn(Arc::clone(&q).run_worker(token.clone()));
        let seen = log();

        let done = q.append_and_wait(tagged("sync", &seen)).await.unwrap();
        assert!(done.delivered);
        assert_eq!(done.value.tag, "sync");

        token.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn completion_wait_can_time_out() {
        let q: Queue<Tagged> = Queue::new("no-worker", QueueLimits::unbounded());
        let seen = log();

        let err = q
            .append_and_wait_timeout(tagged("late", &seen), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::WaitTimedOut {
                timeout: Duration::from_millis(20)
            }
        );
        // the item stays queued
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn rejected_item_closes_its_waiter() {
        let q: Queue<Tagged> = Queue::new("full", QueueLimits::new(0, 1));
        let seen = log();
        q.insert(tagged("a", &seen));

        let (item, done) = QueueItem::new(tagged("b", &seen)).with_completion();
        assert!(!q.insert(item));
        assert_eq!(done.wait().await.unwrap_err(), QueueError::Closed);
    }

    #[test]
    fn duplicate_release_invalidates_exactly_once() {
        let q: Queue<()> = Queue::new("refs", QueueLimits::unbounded());
        let n = 4;
        for _ in 0..n {
            q.duplicate();
        }

        for i in 0..n {
            assert!(!q.release(), "release {i} should not be final");
            assert!(q.have_valid_state());
        }
        assert!(q.release());
        assert!(!q.have_valid_state());
        assert_eq!(q.holders(), 0);
    }

    #[tokio::test]
    async fn warning_fires_once_per_crossing() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let q: Queue<Tagged> = Queue::new("warned", QueueLimits::new(2, 0)).with_bus(bus);
        let seen = log();

        q.insert(tagged("a", &seen));
        q.insert(tagged("b", &seen));
        q.insert(tagged("c", &seen));
        q.process(true).await;
        q.insert(tagged("d", &seen));
        q.insert(tagged("e", &seen));

        let mut warnings = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::QueueLengthWarning {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 2);
        assert_eq!(q.stats().high_water, 3);
    }

    #[tokio::test]
    async fn worker_drains_and_stops_on_invalidation() {
        let q: Arc<Queue<Tagged>> = Arc::new(Queue::new("worker", QueueLimits::unbounded()));
        let seen = log();
        q.insert(tagged("early", &seen));

        let worker = tokio::spawn(Arc::clone(&q).run_worker(CancellationToken::new()));
        let done = q.append_and_wait(tagged("late", &seen)).await.unwrap();
        assert!(done.delivered);
        assert_eq!(*seen.lock().unwrap(), vec!["early", "late"]);

        q.set_state(false);
        worker.await.unwrap();
        assert!(q.is_empty_and_actions_complete());
    }

    #[tokio::test]
    async fn invalidated_resolves_after_set_state_false() {
        let q: Arc<Queue<()>> = Arc::new(Queue::new("inv", QueueLimits::unbounded()));
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.invalidated().await })
        };
        tokio::task::yield_now().await;
        q.set_state(false);
        waiter.await.unwrap();
    }
}
