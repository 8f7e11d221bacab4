//! # notihub
//!
//! **notihub** delivers business events from a server process to many registered
//! consumers living in remote processes, over a possibly slow or flaky connection.
//! Producers never wait on a slow or dead consumer.
//!
//! It provides:
//! - a generic thread-safe priority/FIFO [`Queue`] with a single worker,
//! - a consumer [`Registry`] with fan-out delivery by [`ConsumerType`],
//! - per-identity [`ConsumerQueue`]s with randomized retry delays,
//! - a breaker that unregisters consumers behaving as if dead.
//!
//! ## Architecture
//! ```text
//!   producer
//!      │ broadcast(type, Arc<dyn ConsumerMessage>)
//!      ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Hub                                                          │
//! │  Registry ─── ConsumerId → (type, identity, proxy, queue)    │
//! │  ProxyDirectory ─── ServerIdentity → ConsumerQueue + worker  │
//! │  Bus (broadcast events) ──► SubscriberSet ──► LogWriter, ... │
//! └───────┬───────────────────────────┬──────────────────────────┘
//!         ▼                           ▼
//!  ConsumerQueue(rip-01)       ConsumerQueue(rip-02)       one per remote process
//!   [H, N, N, ...]              [N, N, ...]
//!         │ worker                    │ worker
//!         ▼                           ▼
//!  Delivery → proxy.invoke()   Delivery → proxy.invoke()    the remote call
//!         │
//!         ├─ Err ─► retry after random [min, max] delay (at most max_retries)
//!         └─ max_failed_messages in a row ─► UnregisterRequest ─► Registry
//! ```
//!
//! ### Delivery lifecycle
//! ```text
//! broadcast ──► Delivery per consumer ──► insert (Normal, bounded) / append (High)
//!
//! worker loop {
//!   ├─► wait for work (Notify) or cancellation
//!   ├─► take front item, mark in flight
//!   ├─► registration revoked? ─► skip
//!   ├─► deliver (optional timeout, panics caught)
//!   │     ├─ Ok  ─► reset failure count
//!   │     └─ Err ─► count failure; breaker may report the consumer
//!   │               ├─ retries left ─► sleep (cancellable) ─► re-append at priority
//!   │               └─ exhausted    ─► drop
//!   └─► repeat until the queue is invalidated or the hub token cancelled
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------------|---------------------------------------------|
//! | **Hub**           | Registration, fan-out, server-death callback, orderly teardown. | [`Hub`], [`HubBuilder`]                     |
//! | **Transport seam**| How the hub reaches a remote consumer.                          | [`ConsumerProxy`], [`Invocation`]           |
//! | **Messages**      | Business events shared across all their deliveries.             | [`ConsumerMessage`], [`Notification`]       |
//! | **Queues**        | Priority/FIFO queue, per-identity delivery queue.               | [`Queue`], [`ConsumerQueue`], [`Deliver`]   |
//! | **Policies**      | Retry delay and dead-consumer breaker.                          | [`RetryPolicy`], [`FailureBreaker`]         |
//! | **Events**        | Observe registrations, failures, retries and the drain.         | [`Event`], [`EventKind`], [`Subscribe`]     |
//! | **Errors**        | Typed errors for the hub, deliveries and waits.                 | [`HubError`], [`DeliveryError`], [`QueueError`] |
//! | **Configuration** | Centralized thresholds and timings.                             | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use notihub::{
//!     Config, ConsumerProxy, ConsumerType, DeliveryError, Hub, Invocation, Notification,
//! };
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl ConsumerProxy for Printer {
//!     async fn invoke(&self, call: &Invocation) -> Result<(), DeliveryError> {
//!         println!("{} <- {} bytes", call.method, call.payload.len());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::builder(Config::default()).build();
//!
//!     hub.register_consumer(ConsumerType::JobStatus, "rip-01:4410".into(), Arc::new(Printer))?;
//!
//!     let report = hub.broadcast(
//!         ConsumerType::JobStatus,
//!         Arc::new(Notification::new("JobStatusChanged", b"job 17 done".to_vec())),
//!     )?;
//!     assert_eq!(report.enqueued, 1);
//!
//!     hub.shut_consumer_queues_down().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod consumer;
mod core;
mod error;
mod events;
mod message;
mod policies;
mod queue;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use consumer::{ConsumerId, ConsumerProxy, ConsumerRef, ConsumerType, Invocation, ServerIdentity};
pub use crate::core::{BroadcastReport, DirectoryGuard, Hub, HubBuilder, ProxyDirectory, Registry};
pub use error::{DeliveryError, HubError, QueueError};
pub use events::{Bus, Event, EventKind};
pub use message::{ConsumerMessage, Delivery, MessageRef, Notification};
pub use policies::{FailureBreaker, RetryPolicy};
pub use queue::{
    Completion, ConsumerQueue, Deliver, Priority, ProcessReport, Processed, Queue, QueueItem, QueueLimits,
    QueueStats, UnregisterRequest,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
