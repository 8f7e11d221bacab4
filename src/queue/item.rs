//! # Queue items and the completion handshake.
//!
//! A [`QueueItem`] is a payload plus a [`Priority`] and, optionally, a completion
//! sender. Items without a completion are dropped once their action has run. Items
//! with one hand the payload back through it, so the waiting side owns it again:
//!
//! ```text
//! caller                              worker
//!   │ item.with_completion()            │
//!   │ queue.append(item) ─────────────► │ take_front()
//!   │ completion.wait() ...             │ deliver()
//!   │ ◄──────── Processed { value, delivered }
//! ```

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;

use crate::error::QueueError;

/// Item priority. `High` items are processed before queued `Normal` ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Ordinary traffic; subject to the queue length limit on FIFO enqueue.
    #[default]
    Normal,
    /// Must-deliver traffic; jumps ahead of queued normal items.
    High,
}

/// A payload returned to the caller after processing.
#[derive(Debug)]
pub struct Processed<T> {
    /// The payload, handed back to its owner.
    pub value: T,
    /// Whether the final attempt succeeded.
    pub delivered: bool,
}

/// One unit of queued work.
pub struct QueueItem<T> {
    priority: Priority,
    value: T,
    completion: Option<oneshot::Sender<Processed<T>>>,
}

impl<T> QueueItem<T> {
    /// Wraps `value` at [`Priority::Normal`].
    pub fn new(value: T) -> Self {
        Self {
            priority: Priority::Normal,
            value,
            completion: None,
        }
    }

    /// Wraps `value` at [`Priority::High`].
    pub fn high(value: T) -> Self {
        Self::new(value).with_priority(Priority::High)
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a completion signal and returns the waiting half.
    ///
    /// Replaces any completion attached earlier; the old waiter observes
    /// [`QueueError::Closed`].
    pub fn with_completion(mut self) -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, Completion { rx })
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Whether processing hands the payload back instead of dropping it.
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Ends the item's life in the queue: signal the waiter, or drop.
    pub(crate) fn finish(self, delivered: bool) {
        if let Some(tx) = self.completion {
            // Waiter may have given up; the payload is dropped with the error.
            let _ = tx.send(Processed {
                value: self.value,
                delivered,
            });
        }
    }
}

impl<T> From<T> for QueueItem<T> {
    fn from(value: T) -> Self {
        QueueItem::new(value)
    }
}

/// Waiting half of an item's completion signal.
pub struct Completion<T> {
    rx: oneshot::Receiver<Processed<T>>,
}

impl<T> Completion<T> {
    /// Waits until the item has been processed.
    ///
    /// Fails with [`QueueError::Closed`] if the item was dropped unprocessed
    /// (rejected by the length limit, or its queue was torn down).
    pub async fn wait(self) -> Result<Processed<T>, QueueError> {
        self.rx.await.map_err(|_| QueueError::Closed)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Giving up does not withdraw the item; it is still processed later and its
    /// payload dropped.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Processed<T>, QueueError> {
        match time::timeout(timeout, self.rx).await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_elapsed) => Err(QueueError::WaitTimedOut { timeout }),
        }
    }
}
