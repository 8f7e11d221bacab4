//! Queues: the generic priority/FIFO container and its consumer-delivery specialization.
//!
//! ## Contents
//! - [`Queue`] thread-safe container with `insert` (FIFO, bounded) and `append`
//!   (priority, unbounded), a single-worker loop and holder counting
//! - [`QueueItem`], [`Priority`], [`Completion`] items and the deliver-and-confirm handshake
//! - [`ConsumerQueue`] per-identity queue of [`Delivery`](crate::Delivery)s with retry,
//!   randomized delay and the dead-consumer breaker
//! - [`Deliver`] the per-item action
//!
//! ## Architecture
//! ```text
//! producer ── insert/append ──► [ Queue<T> ] ── notify ──► worker
//!                                                          │
//!                                                 take_front (in flight)
//!                                                          │
//!                                                  attempt(item.deliver())
//!                                                  ├─ timeout (optional)
//!                                                  └─ panic caught
//! ```

mod base;
mod consumer;
mod item;

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time;

use crate::error::DeliveryError;

pub use base::{ProcessReport, Queue, QueueLimits, QueueStats};
pub(crate) use base::Finished;
pub use consumer::{ConsumerQueue, UnregisterRequest};
pub use item::{Completion, Priority, Processed, QueueItem};

/// Action run by a queue worker for each item.
///
/// Called from the queue's worker, one item at a time per queue.
#[async_trait]
pub trait Deliver: Send + Sync + 'static {
    /// Performs the item's work.
    async fn deliver(&self) -> Result<(), DeliveryError>;
}

/// Runs one delivery with an optional timeout, converting panics into errors.
pub(crate) async fn attempt<D: Deliver + ?Sized>(
    item: &D,
    timeout: Option<Duration>,
) -> Result<(), DeliveryError> {
    let guarded = std::panic::AssertUnwindSafe(item.deliver()).catch_unwind();

    let outcome = match timeout {
        Some(dur) => match time::timeout(dur, guarded).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => return Err(DeliveryError::Timeout { timeout: dur }),
        },
        None => guarded.await,
    };

    match outcome {
        Ok(res) => res,
        Err(panic) => Err(DeliveryError::Panicked {
            info: panic_message(panic.as_ref()),
        }),
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(any: &(dyn Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panics;

    #[async_trait]
    impl Deliver for Panics {
        async fn deliver(&self) -> Result<(), DeliveryError> {
            panic!("transport exploded");
        }
    }

    struct Hangs;

    #[async_trait]
    impl Deliver for Hangs {
        async fn deliver(&self) -> Result<(), DeliveryError> {
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn panic_becomes_error() {
        let err = attempt(&Panics, None).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Panicked {
                info: "transport exploded".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_a_stuck_call() {
        let err = attempt(&Hangs, Some(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Timeout {
                timeout: Duration::from_secs(5)
            }
        );
    }
}
