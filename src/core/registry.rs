//! # Consumer registry: who listens to what, and fan-out delivery.
//!
//! The registry maps [`ConsumerId`]s to registrations and turns one
//! `broadcast(type, message)` into one [`Delivery`] per consumer of that type, each
//! enqueued on the consumer's per-identity queue.
//!
//! ## Architecture
//! ```text
//! register(type, identity, proxy)
//!   └─► directory.get_or_create(identity) ──► queue.duplicate() ──► ConsumerId
//!
//! broadcast(type, msg)
//!   └─► for each consumer of type:
//!         High   ──► queue.append(delivery)     never rejected
//!         Normal ──► queue.insert(delivery)     rejected when full, counted
//!
//! breaker listener: UnregisterRequest ──► unregister(id)
//! ```
//!
//! ## Rules
//! - A full queue only affects its own consumer; the broadcast goes on.
//! - Unregistering revokes queued deliveries (they are skipped), releases the
//!   registration's queue reference, and removes the identity from the directory
//!   when its last consumer goes.
//! - No queue operation runs under the registry lock during a broadcast.
//! - Unregistration is not authorized; any caller holding an id may revoke it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::consumer::{ConsumerId, ConsumerRef, ConsumerType, ServerIdentity};
use crate::error::HubError;
use crate::events::{Bus, Event, EventKind};
use crate::message::{Delivery, MessageRef};
use crate::queue::{ConsumerQueue, Priority, UnregisterRequest};

use super::directory::ProxyDirectory;

/// One active registration.
struct Registration {
    consumer_type: ConsumerType,
    identity: ServerIdentity,
    proxy: ConsumerRef,
    queue: Arc<ConsumerQueue>,
    live: Arc<AtomicBool>,
}

struct Inner {
    consumers: HashMap<ConsumerId, Registration>,
    next_id: u64,
    closed: bool,
}

/// Outcome of one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Consumers registered for the type at the time of the broadcast.
    pub targets: usize,
    /// Deliveries accepted by their queues.
    pub enqueued: usize,
    /// Consumers whose queue was full; the message was dropped for them.
    pub rejected: Vec<ConsumerId>,
}

impl BroadcastReport {
    /// True when every target accepted the message.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Registry of consumers by id and type.
pub struct Registry {
    inner: Mutex<Inner>,
    directory: Arc<ProxyDirectory>,
    bus: Bus,
}

impl Registry {
    /// Creates an empty registry backed by `directory`.
    pub fn new(directory: Arc<ProxyDirectory>, bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                consumers: HashMap::new(),
                next_id: 1,
                closed: false,
            }),
            directory,
            bus,
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `proxy` (living in `identity`) for events of `consumer_type`.
    ///
    /// # Errors
    /// - [`HubError::InvalidConsumer`] if the proxy is not bound to an endpoint.
    /// - [`HubError::OutOfMemory`] if the index cannot grow or ids are exhausted.
    /// - [`HubError::ShuttingDown`] after [`close`](Self::close).
    pub fn register(
        &self,
        consumer_type: ConsumerType,
        identity: ServerIdentity,
        proxy: ConsumerRef,
    ) -> Result<ConsumerId, HubError> {
        if !proxy.is_valid() {
            return Err(HubError::InvalidConsumer);
        }

        let mut inner = self.inner();
        if inner.closed {
            return Err(HubError::ShuttingDown);
        }
        inner.consumers.try_reserve(1).map_err(|_| HubError::OutOfMemory {
            context: "growing the consumer index",
        })?;
        let id = ConsumerId(inner.next_id);
        let next = inner.next_id.checked_add(1).ok_or(HubError::OutOfMemory {
            context: "allocating a consumer id",
        })?;

        let queue = self.directory.get_or_create(&identity)?;
        queue.duplicate();
        inner.next_id = next;
        inner.consumers.insert(
            id,
            Registration {
                consumer_type,
                identity: identity.clone(),
                proxy: Arc::clone(&proxy),
                queue,
                live: Arc::new(AtomicBool::new(true)),
            },
        );
        drop(inner);

        tracing::debug!(consumer = %id, consumer_type = consumer_type.as_label(), %identity, proxy = proxy.name(), "consumer registered");
        self.bus.publish(
            Event::new(EventKind::ConsumerRegistered)
                .with_consumer(id)
                .with_consumer_type(consumer_type)
                .with_identity(identity.as_str()),
        );
        Ok(id)
    }

    /// Unregisters `id`.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if `id` is not registered.
    pub fn unregister(&self, id: ConsumerId) -> Result<(), HubError> {
        self.unregister_with(id, "unregistered")
    }

    /// Unregisters the registration holding exactly this proxy.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if no registration holds it.
    pub fn unregister_proxy(&self, proxy: &ConsumerRef) -> Result<ConsumerId, HubError> {
        let mut inner = self.inner();
        let id = inner
            .consumers
            .iter()
            .find(|(_, reg)| Arc::ptr_eq(&reg.proxy, proxy))
            .map(|(id, _)| *id)
            .ok_or(HubError::ConsumerUnknown { id: None })?;

        if let Some(reg) = inner.consumers.remove(&id) {
            self.revoke(id, reg, "unregistered");
        }
        Ok(id)
    }

    /// Unregisters every consumer living in `identity`. Returns how many went.
    pub fn unregister_identity(&self, identity: &ServerIdentity) -> usize {
        let mut inner = self.inner();
        let mut ids: Vec<ConsumerId> = inner
            .consumers
            .iter()
            .filter(|(_, reg)| &reg.identity == identity)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        for id in &ids {
            if let Some(reg) = inner.consumers.remove(id) {
                self.revoke(*id, reg, "server_died");
            }
        }
        ids.len()
    }

    fn unregister_with(&self, id: ConsumerId, reason: &'static str) -> Result<(), HubError> {
        let mut inner = self.inner();
        let reg = inner
            .consumers
            .remove(&id)
            .ok_or(HubError::ConsumerUnknown { id: Some(id) })?;
        self.revoke(id, reg, reason);
        Ok(())
    }

    /// Tears down a registration already taken out of the index.
    ///
    /// Runs under the registry lock so that the "last consumer of this identity"
    /// check cannot race a concurrent registration.
    fn revoke(&self, id: ConsumerId, reg: Registration, reason: &'static str) {
        reg.live.store(false, Ordering::Release);
        reg.queue.release();

        let mut dir = self.directory.lock();
        if let Some(current) = dir.get(&reg.identity) {
            if Arc::ptr_eq(&current, &reg.queue) && current.queue().holders() == 1 {
                dir.remove(&reg.identity);
            }
        }
        drop(dir);

        tracing::debug!(consumer = %id, identity = %reg.identity, reason, "consumer unregistered");
        self.bus.publish(
            Event::new(EventKind::ConsumerUnregistered)
                .with_consumer(id)
                .with_consumer_type(reg.consumer_type)
                .with_identity(reg.identity.as_str())
                .with_reason(reason),
        );
    }

    /// Returns the proxy registered under `id`, optionally requiring its type.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if absent or registered for another type.
    pub fn lookup(&self, id: ConsumerId, consumer_type: Option<ConsumerType>) -> Result<ConsumerRef, HubError> {
        let inner = self.inner();
        inner
            .consumers
            .get(&id)
            .filter(|reg| consumer_type.is_none_or(|t| t == reg.consumer_type))
            .map(|reg| Arc::clone(&reg.proxy))
            .ok_or(HubError::ConsumerUnknown { id: Some(id) })
    }

    /// Enqueues `message` for every consumer of `consumer_type`.
    ///
    /// High-priority messages are appended and never rejected; normal ones are
    /// inserted FIFO and dropped for consumers whose queue is full.
    ///
    /// # Errors
    /// [`HubError::ShuttingDown`] after [`close`](Self::close).
    pub fn broadcast(&self, consumer_type: ConsumerType, message: MessageRef) -> Result<BroadcastReport, HubError> {
        let targets: Vec<(ConsumerId, ConsumerRef, Arc<ConsumerQueue>, Arc<AtomicBool>)> = {
            let inner = self.inner();
            if inner.closed {
                return Err(HubError::ShuttingDown);
            }
            let mut t: Vec<_> = inner
                .consumers
                .iter()
                .filter(|(_, reg)| reg.consumer_type == consumer_type)
                .map(|(id, reg)| {
                    (
                        *id,
                        Arc::clone(&reg.proxy),
                        Arc::clone(&reg.queue),
                        Arc::clone(&reg.live),
                    )
                })
                .collect();
            t.sort_unstable_by_key(|(id, ..)| *id);
            t
        };

        let priority = message.priority();
        let mut report = BroadcastReport {
            targets: targets.len(),
            ..BroadcastReport::default()
        };

        for (id, proxy, queue, live) in targets {
            let item = Delivery::new(Arc::clone(&message), proxy, id, live).into_item();
            let accepted = match priority {
                Priority::High => {
                    queue.append(item);
                    true
                }
                Priority::Normal => queue.insert(item),
            };

            if accepted {
                report.enqueued += 1;
            } else {
                let err = HubError::QueueFull {
                    limit: queue.queue().limits().limit,
                };
                tracing::debug!(consumer = %id, identity = %queue.identity(), error = %err, "broadcast dropped for consumer");
                self.bus.publish(
                    Event::new(EventKind::MessageDropped)
                        .with_consumer(id)
                        .with_consumer_type(consumer_type)
                        .with_identity(queue.identity().as_str())
                        .with_reason(err.as_label()),
                );
                report.rejected.push(id);
            }
        }
        Ok(report)
    }

    /// Ids registered for `consumer_type`, ascending.
    pub fn consumers_of(&self, consumer_type: ConsumerType) -> Vec<ConsumerId> {
        let inner = self.inner();
        let mut ids: Vec<ConsumerId> = inner
            .consumers
            .iter()
            .filter(|(_, reg)| reg.consumer_type == consumer_type)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().consumers.is_empty()
    }

    /// Refuses further registrations and broadcasts.
    pub fn close(&self) {
        self.inner().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    /// Drops every registration. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner();
        let all: Vec<(ConsumerId, Registration)> = inner.consumers.drain().collect();
        let n = all.len();
        for (id, reg) in all {
            self.revoke(id, reg, "shutdown");
        }
        n
    }

    /// Spawns the task that performs unregistrations requested by consumer queues.
    ///
    /// Holds the registry weakly; stops when the registry is gone, every sender is
    /// dropped, or `token` is cancelled.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<UnregisterRequest>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let req = tokio::select! {
                    _ = token.cancelled() => break,
                    req = rx.recv() => match req {
                        Some(req) => req,
                        None => break,
                    },
                };
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                registry.handle_request(&req);
            }
            tracing::trace!("unregister listener exited");
        })
    }

    fn handle_request(&self, req: &UnregisterRequest) {
        match self.unregister_with(req.consumer, "breaker_tripped") {
            Ok(()) => tracing::info!(
                consumer = %req.consumer,
                identity = %req.identity,
                failures = req.failures,
                "dead consumer unregistered"
            ),
            Err(_) => tracing::debug!(consumer = %req.consumer, "tripped consumer already gone"),
        }
    }
}
