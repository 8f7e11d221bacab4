//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to publish
//! and observe what the hub is doing: registrations, delivery failures, retries,
//! drops, breaker trips and the shutdown drain.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Registry`, `ProxyDirectory`, `Queue`/`ConsumerQueue` workers,
//!   `Hub::shut_consumer_queues_down`.
//! - **Consumers**: whoever calls `Hub::subscribe()`, e.g. the `LogWriter` observer.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
