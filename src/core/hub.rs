//! # Hub: the notification subsystem as one object.
//!
//! [`Hub`] owns the [`Registry`], the [`ProxyDirectory`], the event [`Bus`] and the
//! cancellation token every queue worker hangs off.
//!
//! ## High-level architecture
//! ```text
//! register_consumer(type, identity, proxy) ──► Registry ──► ProxyDirectory
//!                                                               └─► ConsumerQueue + worker (per identity)
//! broadcast(type, msg) ──► Registry ──► Delivery per consumer ──► ConsumerQueue
//!                                                                     │
//!                              breaker trip ◄── UnregisterRequest ◄───┘
//!                                   └─► Registry listener ──► unregister
//!
//! server_died(identity) ──► Registry::unregister_identity
//!
//! shut_consumer_queues_down():
//!   registry.close()                      no more registrations or broadcasts
//!   drain_queues(snapshot, drain_grace)   ── DrainStarted
//!     ├─ all idle   ── AllDrainedWithin
//!     └─ deadline   ── GraceExceeded
//!   token.cancel() + directory.close()    workers stop; stuck ones are aborted
//! ```
//!
//! Dropping the hub cancels its token, which stops every worker and listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::consumer::{ConsumerId, ConsumerRef, ConsumerType, ServerIdentity};
use crate::error::HubError;
use crate::events::{Bus, Event, EventKind};
use crate::message::MessageRef;
use crate::queue::QueueStats;

use super::directory::ProxyDirectory;
use super::registry::{BroadcastReport, Registry};
use super::shutdown::drain_queues;

/// Consumer registration, fan-out delivery and orderly teardown.
pub struct Hub {
    cfg: Config,
    bus: Bus,
    registry: Arc<Registry>,
    directory: Arc<ProxyDirectory>,
    token: CancellationToken,
    shut_down: AtomicBool,
}

impl Hub {
    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        registry: Arc<Registry>,
        directory: Arc<ProxyDirectory>,
        token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry,
            directory,
            token,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Starts building a hub; same as [`HubBuilder::new`](super::HubBuilder::new).
    pub fn builder(cfg: Config) -> super::HubBuilder {
        super::HubBuilder::new(cfg)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Receiver for runtime events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ProxyDirectory> {
        &self.directory
    }

    /// Registers `proxy`, living in the remote process `identity`, for `consumer_type`.
    ///
    /// # Errors
    /// See [`Registry::register`].
    pub fn register_consumer(
        &self,
        consumer_type: ConsumerType,
        identity: ServerIdentity,
        proxy: ConsumerRef,
    ) -> Result<ConsumerId, HubError> {
        self.registry.register(consumer_type, identity, proxy)
    }

    /// Unregisters `id`.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if `id` is not registered.
    pub fn unregister_consumer(&self, id: ConsumerId) -> Result<(), HubError> {
        self.registry.unregister(id)
    }

    /// Unregisters the registration holding this proxy.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if no registration holds it.
    pub fn unregister_proxy(&self, proxy: &ConsumerRef) -> Result<ConsumerId, HubError> {
        self.registry.unregister_proxy(proxy)
    }

    /// Proxy registered under `id`, optionally checking its type.
    ///
    /// # Errors
    /// [`HubError::ConsumerUnknown`] if absent or of another type.
    pub fn lookup(&self, id: ConsumerId, consumer_type: Option<ConsumerType>) -> Result<ConsumerRef, HubError> {
        self.registry.lookup(id, consumer_type)
    }

    /// Queues `message` for every consumer of `consumer_type`. Never waits for delivery.
    ///
    /// # Errors
    /// [`HubError::ShuttingDown`] once teardown has begun. Per-consumer overflow is
    /// reported in the [`BroadcastReport`], not as an error.
    pub fn broadcast(&self, consumer_type: ConsumerType, message: MessageRef) -> Result<BroadcastReport, HubError> {
        self.registry.broadcast(consumer_type, message)
    }

    /// Callback for the server-process manager: `identity` is gone.
    ///
    /// Unregisters every consumer living there; returns how many.
    pub fn server_died(&self, identity: &ServerIdentity) -> usize {
        let n = self.registry.unregister_identity(identity);
        tracing::info!(%identity, consumers = n, "server died");
        n
    }

    /// Counters of the queue serving `identity`, if one exists.
    pub fn queue_stats(&self, identity: &ServerIdentity) -> Option<QueueStats> {
        self.directory.lock().get(identity).map(|q| q.stats())
    }

    /// Drains every consumer queue, then stops all workers.
    ///
    /// Waits at most `drain_grace` in total. Calling it again is a no-op.
    ///
    /// # Errors
    /// [`HubError::GraceExceeded`] naming the identities whose queues were still busy;
    /// their workers are aborted.
    pub async fn shut_consumer_queues_down(&self) -> Result<(), HubError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.registry.close();

        let queues = self.directory.snapshot();
        let grace = self.cfg.drain_grace;
        tracing::debug!(queues = queues.len(), ?grace, "draining consumer queues");
        self.bus
            .publish(Event::new(EventKind::DrainStarted).with_queue_len(queues.len()));

        let stuck = drain_queues(&queues, grace, self.cfg.drain_poll_clamped()).await;
        if stuck.is_empty() {
            self.bus.publish(Event::new(EventKind::AllDrainedWithin));
        } else {
            tracing::warn!(?stuck, ?grace, "consumer queues still busy at drain deadline");
            self.bus
                .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
        }

        self.token.cancel();
        for (identity, queue, worker) in self.directory.close() {
            queue.set_state(false);
            queue.release();
            queue.clear();
            if stuck.iter().any(|s| s == identity.as_str()) {
                worker.abort();
            }
            if let Err(e) = worker.await {
                if e.is_panic() {
                    tracing::warn!(%identity, "consumer queue worker panicked");
                }
            }
        }
        self.registry.clear();

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(HubError::GraceExceeded { grace, stuck })
        }
    }

    /// Whether teardown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time;

    use super::*;
    use crate::consumer::{ConsumerProxy, Invocation};
    use crate::core::HubBuilder;
    use crate::error::DeliveryError;
    use crate::message::Notification;
    use crate::subscribers::Subscribe;

    enum Mode {
        Accept,
        Refuse,
        Hang,
    }

    struct Proxy {
        mode: Mode,
        calls: AtomicU32,
    }

    impl Proxy {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConsumerProxy for Proxy {
        async fn invoke(&self, _call: &Invocation) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Accept => Ok(()),
                Mode::Refuse => Err(DeliveryError::failed("connection refused")),
                Mode::Hang => {
                    futures::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn note(body: &'static [u8]) -> MessageRef {
        Arc::new(Notification::new("JobStatusChanged", body))
    }

    fn fast_config() -> Config {
        Config {
            min_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
            drain_grace: Duration::from_millis(500),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_identity_and_drains() {
        let hub = HubBuilder::new(fast_config()).build();
        let a = Proxy::new(Mode::Accept);
        let b = Proxy::new(Mode::Accept);
        hub.register_consumer(ConsumerType::JobStatus, "rip-01".into(), a.clone()).unwrap();
        hub.register_consumer(ConsumerType::JobStatus, "rip-02".into(), b.clone()).unwrap();

        for body in [b"1", b"2", b"3"] {
            let report = hub.broadcast(ConsumerType::JobStatus, note(body)).unwrap();
            assert_eq!(report.enqueued, 2);
        }

        hub.shut_consumer_queues_down().await.unwrap();
        assert_eq!((a.calls(), b.calls()), (3, 3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn consumers_can_register_from_plain_threads() {
        let hub = HubBuilder::new(fast_config()).build();
        let proxy = Proxy::new(Mode::Accept);

        let outcome = {
            let hub = Arc::clone(&hub);
            let proxy = proxy.clone();
            std::thread::spawn(move || {
                hub.register_consumer(ConsumerType::JobStatus, "rip-01".into(), proxy)?;
                hub.broadcast(ConsumerType::JobStatus, note(b"from rpc thread"))
            })
            .join()
            .unwrap()
        };
        assert_eq!(outcome.map(|r| r.enqueued), Ok(1));

        time::timeout(Duration::from_secs(1), async {
            while proxy.calls() == 0 {
                time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        hub.shut_consumer_queues_down().await.unwrap();
    }

    struct AlwaysPanics(AtomicU32);

    #[async_trait]
    impl Subscribe for AlwaysPanics {
        async fn on_event(&self, _ev: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("subscriber bug");
        }
        fn name(&self) -> &'static str {
            "always-panics"
        }
    }

    #[tokio::test]
    async fn always_panicking_subscriber_sees_a_bounded_stream() {
        let sub = Arc::new(AlwaysPanics(AtomicU32::new(0)));
        let subs: Vec<Arc<dyn Subscribe>> = vec![sub.clone()];
        let hub = HubBuilder::new(fast_config()).with_subscribers(subs).build();
        hub.register_consumer(ConsumerType::JobStatus, "rip-01".into(), Proxy::new(Mode::Accept))
            .unwrap();

        time::timeout(Duration::from_secs(1), async {
            while sub.0.load(Ordering::SeqCst) < 2 {
                time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        time::sleep(Duration::from_millis(50)).await;

        // the registration, then the report of the panic it caused
        assert_eq!(sub.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hung_consumer_does_not_delay_others() {
        let hub = HubBuilder::new(fast_config()).build();
        let hung = Proxy::new(Mode::Hang);
        let fine = Proxy::new(Mode::Accept);
        hub.register_consumer(ConsumerType::Progress, "stuck".into(), hung.clone()).unwrap();
        hub.register_consumer(ConsumerType::Progress, "healthy".into(), fine.clone()).unwrap();

        hub.broadcast(ConsumerType::Progress, note(b"10%")).unwrap();
        hub.broadcast(ConsumerType::Progress, note(b"20%")).unwrap();

        let healthy = ServerIdentity::from("healthy");
        time::timeout(Duration::from_secs(1), async {
            while hub.queue_stats(&healthy).map(|s| s.delivered) != Some(2) {
                time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(hung.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_failures_unregister_the_consumer() {
        let cfg = Config {
            max_retries: 0,
            max_failed_messages: 2,
            ..fast_config()
        };
        let hub = HubBuilder::new(cfg).build();
        let mut events = hub.subscribe();
        let dead = Proxy::new(Mode::Refuse);
        let id = hub
            .register_consumer(ConsumerType::Monitor, "gone".into(), dead.clone())
            .unwrap();

        hub.broadcast(ConsumerType::Monitor, note(b"a")).unwrap();
        hub.broadcast(ConsumerType::Monitor, note(b"b")).unwrap();

        time::timeout(Duration::from_secs(1), async {
            while hub.lookup(id, None).is_ok() {
                time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let mut tripped = 0;
        let mut unregistered = None;
        while let Ok(ev) = events.try_recv() {
            match ev.kind {
                EventKind::ConsumerTripped => tripped += 1,
                EventKind::ConsumerUnregistered => unregistered = ev.reason.clone(),
                _ => {}
            }
        }
        assert_eq!(tripped, 1);
        assert_eq!(unregistered.as_deref(), Some("breaker_tripped"));
        assert!(hub.directory().is_empty());
        assert_eq!(dead.calls(), 2);
    }

    #[tokio::test]
    async fn server_death_unregisters_its_consumers() {
        let hub = HubBuilder::new(fast_config()).build();
        let rip = ServerIdentity::from("rip-01");
        let a = hub
            .register_consumer(ConsumerType::JobStatus, rip.clone(), Proxy::new(Mode::Accept))
            .unwrap();
        hub.register_consumer(ConsumerType::Throughput, rip.clone(), Proxy::new(Mode::Accept))
            .unwrap();
        let other = hub
            .register_consumer(ConsumerType::JobStatus, "rip-02".into(), Proxy::new(Mode::Accept))
            .unwrap();

        assert_eq!(hub.server_died(&rip), 2);
        assert_eq!(
            hub.lookup(a, None).err(),
            Some(HubError::ConsumerUnknown { id: Some(a) })
        );
        assert!(hub.lookup(other, Some(ConsumerType::JobStatus)).is_ok());
        assert!(hub.queue_stats(&rip).is_none());
        assert_eq!(hub.server_died(&rip), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_the_hub() {
        let hub = HubBuilder::new(fast_config()).build();
        let mut events = hub.subscribe();
        hub.register_consumer(ConsumerType::RipStatus, "rip-01".into(), Proxy::new(Mode::Accept))
            .unwrap();

        hub.shut_consumer_queues_down().await.unwrap();
        hub.shut_consumer_queues_down().await.unwrap();
        assert!(hub.is_shut_down());
        assert!(hub.directory().is_empty());
        assert!(hub.registry().is_empty());

        assert_eq!(
            hub.broadcast(ConsumerType::RipStatus, note(b"x")).unwrap_err(),
            HubError::ShuttingDown
        );
        assert_eq!(
            hub.register_consumer(ConsumerType::RipStatus, "rip-01".into(), Proxy::new(Mode::Accept))
                .unwrap_err(),
            HubError::ShuttingDown
        );

        let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::DrainStarted).count(),
            1
        );
        assert!(kinds.contains(&EventKind::AllDrainedWithin));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_queue_exceeds_grace() {
        let hub = HubBuilder::new(fast_config()).build();
        hub.register_consumer(ConsumerType::Progress, "stuck".into(), Proxy::new(Mode::Hang))
            .unwrap();
        hub.register_consumer(ConsumerType::Progress, "healthy".into(), Proxy::new(Mode::Accept))
            .unwrap();
        hub.broadcast(ConsumerType::Progress, note(b"50%")).unwrap();

        let err = hub.shut_consumer_queues_down().await.unwrap_err();
        assert_eq!(
            err,
            HubError::GraceExceeded {
                grace: Duration::from_millis(500),
                stuck: vec!["stuck".to_string()],
            }
        );
    }
}
