//! # Non-blocking event fan-out to multiple subscribers.
//!
//! [`SubscriberSet`] distributes events to every subscriber without waiting for any
//! of them.
//!
//! ```text
//! emit(event)
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → SubscriberPanicked
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - Per-subscriber FIFO; no ordering across subscribers.
//! - Overflow drops the event for that subscriber only and publishes
//!   `SubscriberOverflow`.
//! - A panicking subscriber keeps its worker; the panic becomes `SubscriberPanicked`.
//! - Problems while handling the set's own reports are logged, never republished,
//!   so a subscriber that always fails sees each report once.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Bus, Event, EventKind};
use crate::queue::panic_message;

use super::Subscribe;

struct Channel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    channels: Vec<Channel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the set and spawns one worker per subscriber.
    ///
    /// `bus` receives the set's own overflow and panic reports.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let name = sub.name();
            let report = bus.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await;
                    if let Err(panic) = handled {
                        let info = panic_message(panic.as_ref());
                        tracing::warn!(subscriber = name, %info, "subscriber panicked");
                        if !is_own_report(&ev) {
                            report.publish(Event::subscriber_panicked(name, info));
                        }
                    }
                }
            }));
            channels.push(Channel { name, sender: tx });
        }

        Self { channels, workers, bus }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Hands `event` to every subscriber's queue. Never waits.
    pub fn emit(&self, event: Arc<Event>) {
        let own = is_own_report(&event);

        for ch in &self.channels {
            let reason = match ch.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if own {
                tracing::debug!(subscriber = ch.name, reason, "subscriber report dropped");
            } else {
                self.bus.publish(Event::subscriber_overflow(ch.name, reason));
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for w in self.workers {
            let _ = w.await;
        }
    }
}

fn is_own_report(ev: &Event) -> bool {
    matches!(ev.kind, EventKind::SubscriberOverflow | EventKind::SubscriberPanicked)
}
